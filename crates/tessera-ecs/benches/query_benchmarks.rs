//! Query maintenance benchmarks.
//!
//! Measures the per-tick cost of keeping many queries current while a small
//! fraction of a large world churns, against the cost of a full rescan.
//!
//! Run with: `cargo bench --bench query_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use tessera_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

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

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health(u32);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TAGS: [&str; 4] = ["red", "blue", "green", "gold"];

/// A world with `entity_count` registered entities carrying a random mix of
/// components and tags, plus `query_count` live queries.
fn setup(entity_count: usize, query_count: usize) -> (World, Vec<EntityId>, Vec<QueryId>) {
    let mut rng = Pcg64::seed_from_u64(42);
    let mut world = World::new();
    let position: Token = world.register_component::<Position>("position").into();
    let velocity: Token = world.register_component::<Velocity>("velocity").into();
    let health: Token = world.register_component::<Health>("health").into();
    let tags: Vec<Token> = TAGS.iter().map(|t| world.tag_id(t).into()).collect();

    let mut entities = Vec::with_capacity(entity_count);
    for _ in 0..entity_count {
        let entity = world.spawn();
        world
            .add_component(entity, Position { x: 0.0, y: 0.0 })
            .unwrap();
        if rng.gen_bool(0.5) {
            world
                .add_component(entity, Velocity { dx: 1.0, dy: 0.0 })
                .unwrap();
        }
        if rng.gen_bool(0.3) {
            world.add_component(entity, Health(100)).unwrap();
        }
        world
            .add_tag(entity, TAGS[rng.gen_range(0..TAGS.len())])
            .unwrap();
        entities.push(entity);
    }

    let mut queries = Vec::with_capacity(query_count);
    for i in 0..query_count {
        let tag = tags[i % tags.len()];
        let filter = match i % 4 {
            0 => QueryFilter::new().all([position, tag]),
            1 => QueryFilter::new().all([velocity]).not([tag]),
            2 => QueryFilter::new().any([health, tag]),
            _ => QueryFilter::new().one([velocity, health]),
        };
        queries.push(world.create_query(filter));
    }
    world.tick(16.0);
    (world, entities, queries)
}

/// Toggle velocity and a tag on `count` random entities.
fn churn(world: &mut World, entities: &[EntityId], rng: &mut Pcg64, count: usize) {
    for _ in 0..count {
        let entity = entities[rng.gen_range(0..entities.len())];
        if world.has_component::<Velocity>(entity) {
            world.remove_component::<Velocity>(entity).unwrap();
        } else {
            world
                .add_component(entity, Velocity { dx: 1.0, dy: 0.0 })
                .unwrap();
        }
        let tag = TAGS[rng.gen_range(0..TAGS.len())];
        if world.has_tag(entity, tag) {
            world.remove_tag(entity, tag).unwrap();
        } else {
            world.add_tag(entity, tag).unwrap();
        }
    }
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Tick cost with 1% of entities mutated per tick.
fn bench_incremental_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_tick");
    for &entity_count in &[1_000usize, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("entities_x100_queries", entity_count),
            &entity_count,
            |b, &n| {
                let (mut world, entities, _) = setup(n, 100);
                let mut rng = Pcg64::seed_from_u64(7);
                b.iter(|| {
                    churn(&mut world, &entities, &mut rng, n / 100);
                    let next = world.time() + 16.0;
                    black_box(world.tick(next));
                });
            },
        );
    }
    group.finish();
}

/// Cost of rebuilding every query from scratch, for comparison.
fn bench_full_rescan(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_rescan");
    for &entity_count in &[1_000usize, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("entities_x100_queries", entity_count),
            &entity_count,
            |b, &n| {
                let (mut world, _, ids) = setup(n, 100);
                b.iter(|| {
                    for &id in &ids {
                        world.refresh_query(id);
                    }
                    black_box(world.query(ids[0]).matches().len());
                });
            },
        );
    }
    group.finish();
}

/// Pool checkout and return against 100 queries.
fn bench_pool_cycle(c: &mut Criterion) {
    c.bench_function("pool_cycle_1000", |b| {
        let (mut world, _, _) = setup(1_000, 100);
        let pool = world
            .create_pool(
                PoolSpec::new("Bullet")
                    .tag("bullet")
                    .component(Position { x: 0.0, y: 0.0 })
                    .component(Velocity { dx: 5.0, dy: 0.0 }),
            )
            .unwrap();
        b.iter(|| {
            let bullets: Vec<EntityId> = (0..1_000).map(|_| world.pool_get(pool).unwrap()).collect();
            let next = world.time() + 16.0;
            world.tick(next);
            for bullet in bullets {
                world.destroy_entity(bullet).unwrap();
            }
            let next = world.time() + 16.0;
            black_box(world.tick(next));
        });
    });
}

criterion_group!(
    benches,
    bench_incremental_tick,
    bench_full_rescan,
    bench_pool_cycle
);
criterion_main!(benches);
