//! Property tests for incremental query maintenance.
//!
//! Random sequences of deferred and immediate mutations are applied to a world
//! with several live queries. After the final tick, every query's `matches` set
//! must equal what a fresh full scan with the same filter produces.

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;
use tessera_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Pos {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Vel {
    dx: f32,
    dy: f32,
}

/// Operations we can perform on the world. Indices pick from every entity
/// handed out so far, dead or alive.
#[derive(Debug, Clone)]
enum QueryOp {
    Spawn,
    SpawnImmediate,
    PoolGet,
    Destroy(usize),
    DestroyImmediate(usize),
    AddPos(usize),
    AddPosImmediate(usize),
    RemovePos(usize),
    AddVel(usize),
    RemoveVel(usize),
    RemoveVelImmediate(usize),
    AddTag(usize),
    AddTagImmediate(usize),
    RemoveTag(usize),
    Tick,
}

fn query_op_strategy() -> impl Strategy<Value = QueryOp> {
    prop_oneof![
        Just(QueryOp::Spawn),
        Just(QueryOp::SpawnImmediate),
        Just(QueryOp::PoolGet),
        (0..40usize).prop_map(QueryOp::Destroy),
        (0..40usize).prop_map(QueryOp::DestroyImmediate),
        (0..40usize).prop_map(QueryOp::AddPos),
        (0..40usize).prop_map(QueryOp::AddPosImmediate),
        (0..40usize).prop_map(QueryOp::RemovePos),
        (0..40usize).prop_map(QueryOp::AddVel),
        (0..40usize).prop_map(QueryOp::RemoveVel),
        (0..40usize).prop_map(QueryOp::RemoveVelImmediate),
        (0..40usize).prop_map(QueryOp::AddTag),
        (0..40usize).prop_map(QueryOp::AddTagImmediate),
        (0..40usize).prop_map(QueryOp::RemoveTag),
        Just(QueryOp::Tick),
    ]
}

struct Tokens {
    pos: Token,
    vel: Token,
    hot: Token,
    bullet: Token,
}

/// Filters with at least one positive term.
fn filters(t: &Tokens) -> Vec<QueryFilter> {
    vec![
        QueryFilter::new().all([t.pos]),
        QueryFilter::new().all([t.pos, t.vel]),
        QueryFilter::new().any([t.vel, t.hot]),
        QueryFilter::new().one([t.pos, t.hot]),
        QueryFilter::new().all([t.vel]).not([t.hot]),
        QueryFilter::new().all([t.bullet]).not([t.vel]),
        QueryFilter::new().any([t.pos, t.bullet]).one([t.vel, t.hot]),
        QueryFilter::new()
            .all([t.pos])
            .custom(|view| view.get::<Pos>().is_some_and(|p| p.x >= 0.0), [t.pos]),
    ]
}

fn matches_of(world: &World, query: QueryId) -> BTreeSet<EntityId> {
    world.query(query).matches().iter().collect()
}

fn apply(world: &mut World, pool: PoolId, handles: &mut Vec<EntityId>, pooled: &mut HashSet<EntityId>, op: QueryOp) {
    let pick = |handles: &Vec<EntityId>, i: usize| -> Option<EntityId> {
        if handles.is_empty() {
            None
        } else {
            Some(handles[i % handles.len()])
        }
    };
    let pos = |n: usize| Pos {
        x: n as f32 - 20.0,
        y: 0.0,
    };

    match op {
        QueryOp::Spawn => handles.push(world.spawn()),
        QueryOp::SpawnImmediate => handles.push(world.spawn_immediate()),
        QueryOp::PoolGet => {
            let entity = world.pool_get(pool).unwrap();
            pooled.insert(entity);
            handles.push(entity);
        }
        QueryOp::Destroy(i) => {
            if let Some(e) = pick(handles, i) {
                let _ = world.destroy_entity(e);
            }
        }
        QueryOp::DestroyImmediate(i) => {
            if let Some(e) = pick(handles, i) {
                let _ = world.destroy_entity_immediate(e);
            }
        }
        QueryOp::AddPos(i) | QueryOp::AddPosImmediate(i) => {
            if let Some(e) = pick(handles, i) {
                if world.is_alive(e) && !world.has_component::<Pos>(e) {
                    if matches!(op, QueryOp::AddPos(_)) {
                        world.add_component(e, pos(i)).unwrap();
                    } else {
                        world.add_component_immediate(e, pos(i)).unwrap();
                    }
                }
            }
        }
        QueryOp::RemovePos(i) => {
            if let Some(e) = pick(handles, i) {
                // Position is part of the pool shape.
                if !pooled.contains(&e) {
                    let _ = world.remove_component::<Pos>(e);
                }
            }
        }
        QueryOp::AddVel(i) => {
            if let Some(e) = pick(handles, i) {
                if world.is_alive(e) && !world.has_component::<Vel>(e) {
                    world.add_component(e, Vel { dx: 1.0, dy: 0.0 }).unwrap();
                }
            }
        }
        QueryOp::RemoveVel(i) => {
            if let Some(e) = pick(handles, i) {
                let _ = world.remove_component::<Vel>(e);
            }
        }
        QueryOp::RemoveVelImmediate(i) => {
            if let Some(e) = pick(handles, i) {
                let _ = world.remove_component_immediate::<Vel>(e);
            }
        }
        QueryOp::AddTag(i) => {
            if let Some(e) = pick(handles, i) {
                let _ = world.add_tag(e, "hot");
            }
        }
        QueryOp::AddTagImmediate(i) => {
            if let Some(e) = pick(handles, i) {
                let _ = world.add_tag_immediate(e, "hot");
            }
        }
        QueryOp::RemoveTag(i) => {
            if let Some(e) = pick(handles, i) {
                let _ = world.remove_tag(e, "hot");
            }
        }
        QueryOp::Tick => {
            let next = world.time() + 16.0;
            world.tick(next);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn incremental_matches_equal_full_scan(ops in prop::collection::vec(query_op_strategy(), 1..120)) {
        let mut world = World::new();
        let tokens = Tokens {
            pos: world.register_component::<Pos>("pos").into(),
            vel: world.register_component::<Vel>("vel").into(),
            hot: world.tag_id("hot").into(),
            bullet: world.tag_id("bullet").into(),
        };

        // Half the queries exist before the pool, half are created after it.
        let all_filters = filters(&tokens);
        let split = all_filters.len() / 2;
        let mut queries = Vec::new();
        let mut filters_iter = all_filters.into_iter();
        for filter in filters_iter.by_ref().take(split) {
            queries.push(world.create_query(filter));
        }
        let pool = world
            .create_pool(PoolSpec::new("Bullet").tag("bullet").component(Pos { x: 1.0, y: 1.0 }))
            .unwrap();
        for filter in filters_iter {
            queries.push(world.create_query(filter));
        }

        let mut handles = Vec::new();
        let mut pooled = HashSet::new();
        for op in ops {
            apply(&mut world, pool, &mut handles, &mut pooled, op);
        }
        let next = world.time() + 16.0;
        world.tick(next);

        let rescans = filters(&tokens);
        for (&query, filter) in queries.iter().zip(rescans) {
            let fresh = world.create_query(filter);
            prop_assert_eq!(
                matches_of(&world, query),
                matches_of(&world, fresh),
                "query {:?} diverged from a full scan",
                query
            );
            world.remove_query(fresh);
        }

        for &query in &queries {
            for entity in world.query(query).matches().iter() {
                prop_assert!(world.is_registered(entity));
            }
        }
    }

    #[test]
    fn added_and_deleted_are_transient(ops in prop::collection::vec(query_op_strategy(), 1..60)) {
        let mut world = World::new();
        let tokens = Tokens {
            pos: world.register_component::<Pos>("pos").into(),
            vel: world.register_component::<Vel>("vel").into(),
            hot: world.tag_id("hot").into(),
            bullet: world.tag_id("bullet").into(),
        };
        let queries: Vec<QueryId> = filters(&tokens)
            .into_iter()
            .map(|filter| world.create_query(filter))
            .collect();
        let pool = world
            .create_pool(PoolSpec::new("Bullet").tag("bullet").component(Pos { x: 1.0, y: 1.0 }))
            .unwrap();

        let mut handles = Vec::new();
        let mut pooled = HashSet::new();
        for op in ops {
            apply(&mut world, pool, &mut handles, &mut pooled, op);
        }
        world.tick(world.time() + 16.0);
        prop_assert_eq!(world.pending_commands(), 0);

        // A tick with no mutation leaves no membership deltas behind.
        world.tick(world.time() + 16.0);
        for &query in &queries {
            prop_assert!(world.query(query).added().is_empty());
            prop_assert!(world.query(query).deleted().is_empty());
        }
    }
}
