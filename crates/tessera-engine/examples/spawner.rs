//! Headless spawner demo: a routine fires pooled bullets, a fixed-rate system
//! moves them and a cleanup system returns the ones that leave the field.
//!
//! Run with:
//!   cargo run --example spawner -p tessera-engine
//!
//! Set `RUST_LOG=tessera_ecs=debug` to watch pool and command activity.

use tessera_engine::prelude::*;
use tracing::info;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Velocity {
    dx: f64,
    dy: f64,
}

const FIELD_WIDTH: f64 = 100.0;

/// Moves everything with a velocity, 50 times per second.
struct Movement {
    moving: QueryId,
}

impl FixedUpdate for Movement {
    fn fixed_update(&mut self, world: &mut World, step_ms: f64) {
        let seconds = step_ms / 1000.0;
        world.for_each_match(self.moving, |world, entity| {
            let Some(&Velocity { dx, dy }) = world.get_component::<Velocity>(entity) else {
                return;
            };
            if let Some(pos) = world.get_component_mut::<Position>(entity) {
                pos.x += dx * seconds;
                pos.y += dy * seconds;
            }
        });
    }

    fn priority(&self) -> i32 {
        10
    }
}

/// Returns bullets that left the field to their pool.
struct Cleanup {
    bullets: QueryId,
    returned: u64,
}

impl System for Cleanup {
    fn update(&mut self, world: &mut World) {
        let mut returned = 0;
        world.for_each_match(self.bullets, |world, entity| {
            let outside = world
                .get_component::<Position>(entity)
                .is_some_and(|pos| pos.x > FIELD_WIDTH);
            if outside && world.destroy_entity(entity).is_ok() {
                returned += 1;
            }
        });
        self.returned += returned;
    }
}

/// Fires one bullet every `every` ticks, forever.
fn spawner(pool: PoolId, every: u64) -> impl FnMut(&mut World) -> Step {
    move |world: &mut World| {
        if world.tick_count() % every == 0 {
            if let Ok(bullet) = world.pool_get(pool) {
                if let Some(vel) = world.get_component_mut::<Velocity>(bullet) {
                    vel.dx = 400.0;
                }
            }
        }
        Step::Continue
    }
}

fn main() -> anyhow::Result<()> {
    let config = EngineConfig::default().headless();
    tessera_engine::logging::init(&config.log_filter);

    let mut world = World::new();
    let position = world.register_component::<Position>("position");
    let velocity = world.register_component::<Velocity>("velocity");
    let bullet_tag = world.tag_id("bullet");

    let pool = world.create_pool(
        PoolSpec::new("Bullet")
            .tag("bullet")
            .component(Position { x: 0.0, y: 0.0 })
            .component(Velocity { dx: 0.0, dy: 0.0 }),
    )?;
    let moving = world.create_query(QueryFilter::new().all([position, velocity]));
    let bullets = world.create_query(QueryFilter::new().all([bullet_tag]));

    world.add_system(FixedUpdateSystem::new(20.0, Movement { moving }));
    world.add_system(Cleanup {
        bullets,
        returned: 0,
    });
    world.spawn_routine(spawner(pool, 5));

    let mut frames = FrameLoop::new(world, config);
    frames.run_frames(600);

    let world = frames.world();
    let stats = world.pool(pool).map(|p| (p.constructed(), p.checkouts(), p.free_len()));
    info!(
        frames = frames.frame(),
        live_bullets = world.query(bullets).matches().len(),
        returned = world.system::<Cleanup>().map_or(0, |c| c.returned),
        ?stats,
        "simulation finished"
    );

    let path = std::env::temp_dir().join("tessera-spawner-save.json");
    let save = frames.save(&path)?;
    info!(path = %path.display(), hash = %save.hash, "saved");
    Ok(())
}
