//! Property tests for ECS operations.
//!
//! These tests use `proptest` to generate random sequences of ECS operations
//! and verify that world invariants hold after each sequence.

use std::collections::HashSet;

use proptest::prelude::*;
use tessera_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Water(f64);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Citizens(u64);

/// Operations we can perform on the world.
#[derive(Debug, Clone)]
enum EcsOp {
    SpawnWater(i32),
    SpawnBoth(i32, u64),
    Despawn(usize),
    DespawnStale(usize),
    InsertCitizens(usize, u64),
    RemoveCitizens(usize),
}

fn ecs_op_strategy() -> impl Strategy<Value = EcsOp> {
    prop_oneof![
        (-10_000i32..10_000).prop_map(EcsOp::SpawnWater),
        (-10_000i32..10_000, 0..1_000u64).prop_map(|(w, c)| EcsOp::SpawnBoth(w, c)),
        (0..100usize).prop_map(EcsOp::Despawn),
        (0..100usize).prop_map(EcsOp::DespawnStale),
        (0..100usize, 0..1_000u64).prop_map(|(i, c)| EcsOp::InsertCitizens(i, c)),
        (0..100usize).prop_map(EcsOp::RemoveCitizens),
    ]
}

fn setup_world() -> World {
    let mut world = World::new();
    world.register_component::<Water>("water");
    world.register_component::<Citizens>("citizens");
    world
}

/// Apply `ops`, returning the surviving handles and every handle that has
/// been despawned.
fn apply(world: &mut World, ops: &[EcsOp]) -> (Vec<EntityId>, Vec<EntityId>) {
    let mut alive: Vec<EntityId> = Vec::new();
    let mut dead: Vec<EntityId> = Vec::new();

    for op in ops {
        match *op {
            EcsOp::SpawnWater(w) => {
                alive.push(world.spawn_with((Water(w as f64 * 0.5),)).unwrap());
            }
            EcsOp::SpawnBoth(w, c) => {
                alive.push(world.spawn_with((Water(w as f64), Citizens(c))).unwrap());
            }
            EcsOp::Despawn(i) => {
                if !alive.is_empty() {
                    let e = alive.swap_remove(i % alive.len());
                    world.despawn(e).unwrap();
                    dead.push(e);
                }
            }
            EcsOp::DespawnStale(i) => {
                if !dead.is_empty() {
                    let e = dead[i % dead.len()];
                    assert!(world.despawn(e).is_err());
                }
            }
            EcsOp::InsertCitizens(i, c) => {
                if !alive.is_empty() {
                    let e = alive[i % alive.len()];
                    world.insert_component(e, Citizens(c)).unwrap();
                }
            }
            EcsOp::RemoveCitizens(i) => {
                if !alive.is_empty() {
                    let e = alive[i % alive.len()];
                    let had = world.has_component::<Citizens>(e);
                    assert_eq!(world.remove_component::<Citizens>(e).is_ok(), had);
                }
            }
        }
    }
    (alive, dead)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn random_ops_preserve_invariants(ops in prop::collection::vec(ecs_op_strategy(), 1..60)) {
        let mut world = setup_world();
        let (alive, dead) = apply(&mut world, &ops);

        prop_assert_eq!(world.entity_count(), alive.len());

        // Live handles are unique and resolvable.
        let unique: HashSet<EntityId> = alive.iter().copied().collect();
        prop_assert_eq!(unique.len(), alive.len());
        for &e in &alive {
            prop_assert!(world.is_alive(e));
        }

        // No despawned handle ever resolves again.
        for &e in &dead {
            prop_assert!(!world.is_alive(e));
            prop_assert!(world.get_component::<Water>(e).is_none());
        }

        // Every stored row belongs to a live entity.
        for &e in world.store::<Water>().unwrap().entities() {
            prop_assert!(world.is_alive(e));
        }
        for &e in world.store::<Citizens>().unwrap().entities() {
            prop_assert!(world.is_alive(e));
        }
    }

    #[test]
    fn identical_op_sequences_iterate_identically(ops in prop::collection::vec(ecs_op_strategy(), 1..60)) {
        let mut a = setup_world();
        let mut b = setup_world();
        apply(&mut a, &ops);
        apply(&mut b, &ops);

        let rows = |w: &World| -> Vec<(EntityId, u64)> {
            w.store::<Citizens>().unwrap().iter().map(|(e, c)| (e, c.0)).collect()
        };
        prop_assert_eq!(rows(&a), rows(&b));
        prop_assert_eq!(a.spawn(), b.spawn());
    }

    #[test]
    fn snapshot_restore_matches_original(ops in prop::collection::vec(ecs_op_strategy(), 1..60)) {
        let mut world = setup_world();
        apply(&mut world, &ops);

        let snapshot = world.capture_snapshot().unwrap();
        let mut restored = setup_world();
        restored.restore_from_snapshot(&snapshot).unwrap();

        prop_assert_eq!(restored.capture_snapshot().unwrap(), snapshot);
        prop_assert_eq!(restored.spawn(), world.spawn());
    }
}
