//! World snapshot and restore support.
//!
//! Provides [`WorldSnapshot`] -- a fully serializable representation of the
//! ECS world state: the allocator (generations, alive flags, FIFO free list)
//! and, per registered component name, the store's dense contents in dense
//! order. Restoring a snapshot reproduces entity ids, future allocation order
//! and iteration order exactly.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::component::{ErasedStore, StoredRow};
use crate::entity::{EntityAllocator, EntityId};
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Serializable snapshot of the [`EntityAllocator`] state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorSnapshot {
    /// Per-slot generation counters.
    pub generations: Vec<u32>,
    /// Per-slot alive flags.
    pub alive: Vec<bool>,
    /// Free slots in FIFO order.
    pub free_slots: Vec<u32>,
}

/// A complete, serializable snapshot of the ECS world state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Allocator state.
    pub allocator: AllocatorSnapshot,
    /// Component name -> dense rows. `BTreeMap` keeps the encoding ordered.
    pub component_tables: BTreeMap<String, Vec<StoredRow>>,
}

impl WorldSnapshot {
    /// Number of live entities recorded in the snapshot.
    pub fn entity_count(&self) -> usize {
        self.allocator.alive.iter().filter(|&&a| a).count()
    }
}

fn corrupt(details: String) -> EcsError {
    EcsError::CorruptSnapshot { details }
}

// ---------------------------------------------------------------------------
// World snapshot/restore impl
// ---------------------------------------------------------------------------

impl World {
    /// Capture a complete snapshot of the world state.
    ///
    /// # Errors
    ///
    /// [`EcsError::ComponentSerialization`] if a component value cannot be
    /// represented as JSON.
    pub fn capture_snapshot(&self) -> Result<WorldSnapshot, EcsError> {
        let (generations, alive, free_slots) = self.allocator.snapshot_state();

        let mut component_tables = BTreeMap::new();
        for (name, store) in self.store_entries() {
            let rows = store
                .dump()
                .map_err(|details| EcsError::ComponentSerialization {
                    component: name.to_owned(),
                    details,
                })?;
            component_tables.insert(name.to_owned(), rows);
        }

        Ok(WorldSnapshot {
            allocator: AllocatorSnapshot {
                generations,
                alive,
                free_slots,
            },
            component_tables,
        })
    }

    /// Restore the world state from a previously captured snapshot.
    ///
    /// The same component types must already be registered; registration is
    /// not part of the snapshot. Registered types absent from the snapshot end
    /// up empty.
    ///
    /// Every check runs before any state is replaced, so on error the world is
    /// exactly as it was.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownComponent`] if a table names an unregistered type.
    /// - [`EcsError::CorruptSnapshot`] if the allocator parts are inconsistent
    ///   or a row belongs to an entity the allocator does not consider live.
    /// - [`EcsError::ComponentDeserialization`] if a value fails to decode.
    pub fn restore_from_snapshot(&mut self, snapshot: &WorldSnapshot) -> Result<(), EcsError> {
        // 1. Every table must map to a registered store.
        for name in snapshot.component_tables.keys() {
            if self.store_index(name).is_none() {
                return Err(EcsError::UnknownComponent {
                    name: name.clone(),
                    registered: self.component_names().join(", "),
                });
            }
        }

        // 2. Allocator parts must agree with each other.
        let alloc = &snapshot.allocator;
        if alloc.generations.len() != alloc.alive.len() {
            return Err(corrupt(format!(
                "allocator has {} generations but {} alive flags",
                alloc.generations.len(),
                alloc.alive.len()
            )));
        }
        let mut seen = HashSet::new();
        for &slot in &alloc.free_slots {
            match alloc.alive.get(slot as usize) {
                None => {
                    return Err(corrupt(format!(
                        "free slot {slot} out of bounds (allocator has {} slots)",
                        alloc.alive.len()
                    )))
                }
                Some(true) => {
                    return Err(corrupt(format!("free list contains live slot {slot}")))
                }
                Some(false) => {}
            }
            if !seen.insert(slot) {
                return Err(corrupt(format!("free list contains slot {slot} twice")));
            }
        }
        let dead = alloc.alive.iter().filter(|&&a| !a).count();
        if dead != alloc.free_slots.len() {
            return Err(corrupt(format!(
                "{dead} dead slots but {} free-list entries",
                alloc.free_slots.len()
            )));
        }

        // 3. Rows may only reference live entities with matching generations.
        let live = |entity: EntityId| {
            let idx = entity.slot() as usize;
            alloc.alive.get(idx).copied().unwrap_or(false)
                && alloc.generations[idx] == entity.generation()
        };
        for (name, rows) in &snapshot.component_tables {
            if let Some(row) = rows.iter().find(|row| !live(row.entity)) {
                return Err(corrupt(format!(
                    "table '{name}' has a row for {} which is not live",
                    row.entity
                )));
            }
        }

        // 4. Decode into fresh stores; swap them in only when all succeed.
        let mut replacements: Vec<Box<dyn ErasedStore>> = Vec::with_capacity(self.store_len());
        for idx in 0..self.store_len() {
            replacements.push(self.erased_store(idx).empty_like());
        }
        for (name, rows) in &snapshot.component_tables {
            let Some(idx) = self.store_index(name) else {
                continue;
            };
            replacements[idx]
                .load(rows)
                .map_err(|details| EcsError::ComponentDeserialization {
                    component: name.clone(),
                    details,
                })?;
        }

        self.replace_stores(replacements);
        self.allocator = EntityAllocator::restore_from_snapshot(
            alloc.generations.clone(),
            alloc.alive.clone(),
            alloc.free_slots.clone(),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Stock(u32);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Label(String);

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Stock>("stock");
        world.register_component::<Label>("label");
        world
    }

    #[test]
    fn empty_world_snapshot() {
        let world = setup_world();
        let snapshot = world.capture_snapshot().unwrap();
        assert_eq!(snapshot.entity_count(), 0);
        assert_eq!(snapshot.component_tables.len(), 2);
        assert!(snapshot.component_tables["stock"].is_empty());
    }

    #[test]
    fn restore_rejects_unknown_table_without_mutation() {
        let mut source = setup_world();
        source.spawn_with((Stock(1),)).unwrap();
        let snapshot = source.capture_snapshot().unwrap();

        let mut target = World::new();
        target.register_component::<Stock>("stock");
        let keep = target.spawn_with((Stock(42),)).unwrap();

        let err = target.restore_from_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, EcsError::UnknownComponent { .. }));
        assert_eq!(target.get_component::<Stock>(keep), Some(&Stock(42)));
    }

    #[test]
    fn restore_rejects_row_for_dead_entity() {
        let mut world = setup_world();
        let e = world.spawn_with((Stock(1),)).unwrap();
        let mut snapshot = world.capture_snapshot().unwrap();
        snapshot.allocator.alive[e.slot() as usize] = false;
        snapshot.allocator.free_slots.push(e.slot());

        let err = world.restore_from_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, EcsError::CorruptSnapshot { .. }));
    }

    #[test]
    fn restore_rejects_free_list_of_live_slot() {
        let mut world = setup_world();
        let e = world.spawn();
        let mut snapshot = world.capture_snapshot().unwrap();
        snapshot.allocator.free_slots.push(e.slot());
        assert!(matches!(
            world.restore_from_snapshot(&snapshot),
            Err(EcsError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn restore_rejects_bad_value_without_mutation() {
        let mut world = setup_world();
        let e = world.spawn_with((Stock(3), Label("a".into()))).unwrap();
        let mut snapshot = world.capture_snapshot().unwrap();
        snapshot.component_tables.get_mut("stock").unwrap()[0].value =
            serde_json::json!({"bad": true});

        world.insert_component(e, Stock(9)).unwrap();
        let err = world.restore_from_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, EcsError::ComponentDeserialization { .. }));
        assert_eq!(world.get_component::<Stock>(e), Some(&Stock(9)));
        assert_eq!(world.get_component::<Label>(e), Some(&Label("a".into())));
    }
}
