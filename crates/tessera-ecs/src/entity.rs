//! Entity identifiers and allocation.
//!
//! An [`EntityId`] is a 64-bit handle that packs a *generation* counter in the
//! high 32 bits and a *slot* index in the low 32 bits. The allocator is a flat
//! slot table: one generation counter and one alive flag per slot, plus a FIFO
//! free list. Reusing a slot bumps its generation, so every handle issued for
//! the previous occupant is detectably stale.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A generational entity identifier.
///
/// Layout: `[generation: u32 | slot: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Construct an `EntityId` from a slot index and generation.
    #[inline]
    pub fn new(slot: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | slot as u64)
    }

    /// The slot portion (low 32 bits).
    #[inline]
    pub fn slot(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.slot(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Issues and reclaims [`EntityId`]s.
///
/// Freed slots are queued FIFO and reused before the table grows. The
/// generation of a slot is incremented when the slot is handed out again,
/// never on free, which lets [`free`](Self::free) tell a double free (the
/// handle is the slot's latest occupant, already dead) apart from a use after
/// free (the slot has since been reissued).
#[derive(Debug, Clone, Default)]
pub struct EntityAllocator {
    /// Current generation for each slot.
    generations: Vec<u32>,
    /// Whether the slot is currently alive.
    alive: Vec<bool>,
    /// Free slots in the order they were freed.
    free_slots: VecDeque<u32>,
    /// Number of live entities, kept so `live_count` is O(1).
    live: usize,
}

impl EntityAllocator {
    /// Create a new, empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an unused [`EntityId`].
    ///
    /// The oldest freed slot is reused first, with its generation bumped;
    /// otherwise the slot table grows by one.
    pub fn allocate(&mut self) -> EntityId {
        self.live += 1;
        if let Some(slot) = self.free_slots.pop_front() {
            let idx = slot as usize;
            self.generations[idx] = self.generations[idx].wrapping_add(1);
            self.alive[idx] = true;
            EntityId::new(slot, self.generations[idx])
        } else {
            let slot = self.generations.len() as u32;
            self.generations.push(0);
            self.alive.push(true);
            EntityId::new(slot, 0)
        }
    }

    /// Release a live entity and queue its slot for reuse.
    ///
    /// # Errors
    ///
    /// - [`EcsError::DoubleFree`] if `entity` is the slot's latest occupant and
    ///   was already freed.
    /// - [`EcsError::UseAfterFree`] if the generation does not match the slot
    ///   (the handle is stale) or the slot was never allocated.
    ///
    /// The allocator is left untouched on error.
    pub fn free(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let idx = entity.slot() as usize;
        let Some(&generation) = self.generations.get(idx) else {
            tracing::warn!(%entity, "free of a slot that was never allocated");
            return Err(EcsError::UseAfterFree { entity });
        };
        if generation != entity.generation() {
            tracing::warn!(%entity, current_generation = generation, "free of a stale entity handle");
            return Err(EcsError::UseAfterFree { entity });
        }
        if !self.alive[idx] {
            tracing::warn!(%entity, "entity freed twice");
            return Err(EcsError::DoubleFree { entity });
        }
        self.alive[idx] = false;
        self.live -= 1;
        self.free_slots.push_back(entity.slot());
        Ok(())
    }

    /// Returns `true` if `entity` refers to a live slot whose generation
    /// matches. O(1).
    #[inline]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        let idx = entity.slot() as usize;
        idx < self.generations.len()
            && self.alive[idx]
            && self.generations[idx] == entity.generation()
    }

    /// Number of currently live entities.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Size of the slot table (live and dead slots).
    pub fn slot_count(&self) -> usize {
        self.generations.len()
    }

    /// Live entity ids in slot order.
    pub fn live_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.generations
            .iter()
            .zip(&self.alive)
            .enumerate()
            .filter(|(_, (_, alive))| **alive)
            .map(|(slot, (generation, _))| EntityId::new(slot as u32, *generation))
    }

    /// Capture the allocator state for snapshot/restore.
    ///
    /// Returns `(generations, alive, free_slots)` as owned vectors; the free
    /// list is in FIFO order.
    pub fn snapshot_state(&self) -> (Vec<u32>, Vec<bool>, Vec<u32>) {
        let free: Vec<u32> = self.free_slots.iter().copied().collect();
        (self.generations.clone(), self.alive.clone(), free)
    }

    /// Rebuild an allocator from a previously captured state.
    ///
    /// The caller is expected to have validated the parts (see
    /// [`World::restore_from_snapshot`](crate::world::World::restore_from_snapshot)).
    pub fn restore_from_snapshot(
        generations: Vec<u32>,
        alive: Vec<bool>,
        free_slots: Vec<u32>,
    ) -> Self {
        let live = alive.iter().filter(|&&a| a).count();
        Self {
            generations,
            alive,
            free_slots: VecDeque::from(free_slots),
            live,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_unique_slots() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<EntityId> = (0..100).map(|_| alloc.allocate()).collect();
        let mut slots: Vec<u32> = ids.iter().map(|id| id.slot()).collect();
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), 100);
    }

    #[test]
    fn generation_increments_on_reuse() {
        let mut alloc = EntityAllocator::new();
        let e0 = alloc.allocate();
        assert_eq!(e0.generation(), 0);
        alloc.free(e0).unwrap();
        let e1 = alloc.allocate();
        assert_eq!(e1.slot(), e0.slot());
        assert_eq!(e1.generation(), 1);
    }

    #[test]
    fn free_list_is_fifo() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        alloc.free(b).unwrap();
        alloc.free(a).unwrap();
        alloc.free(c).unwrap();

        assert_eq!(alloc.allocate().slot(), b.slot());
        assert_eq!(alloc.allocate().slot(), a.slot());
        assert_eq!(alloc.allocate().slot(), c.slot());
        // Free list exhausted: the table grows.
        assert_eq!(alloc.allocate().slot(), 3);
    }

    #[test]
    fn stale_handle_detection() {
        let mut alloc = EntityAllocator::new();
        let e0 = alloc.allocate();
        assert!(alloc.is_alive(e0));
        alloc.free(e0).unwrap();
        assert!(!alloc.is_alive(e0));
        let e1 = alloc.allocate();
        assert!(!alloc.is_alive(e0), "stale handle still dead after reuse");
        assert!(alloc.is_alive(e1));
    }

    #[test]
    fn double_free_is_reported() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate();
        alloc.free(e).unwrap();
        assert!(matches!(alloc.free(e), Err(EcsError::DoubleFree { .. })));
        assert_eq!(alloc.live_count(), 0);
    }

    #[test]
    fn free_after_reuse_is_use_after_free() {
        let mut alloc = EntityAllocator::new();
        let old = alloc.allocate();
        alloc.free(old).unwrap();
        let new = alloc.allocate();

        assert!(matches!(
            alloc.free(old),
            Err(EcsError::UseAfterFree { .. })
        ));
        // The new occupant is untouched.
        assert!(alloc.is_alive(new));
        assert_eq!(alloc.live_count(), 1);
    }

    #[test]
    fn free_of_unknown_slot_is_use_after_free() {
        let mut alloc = EntityAllocator::new();
        let bogus = EntityId::new(17, 0);
        assert!(matches!(
            alloc.free(bogus),
            Err(EcsError::UseAfterFree { .. })
        ));
    }

    #[test]
    fn live_count_and_iteration() {
        let mut alloc = EntityAllocator::new();
        let e0 = alloc.allocate();
        let e1 = alloc.allocate();
        let e2 = alloc.allocate();
        alloc.free(e1).unwrap();
        assert_eq!(alloc.live_count(), 2);
        assert_eq!(alloc.slot_count(), 3);
        let live: Vec<EntityId> = alloc.live_entities().collect();
        assert_eq!(live, vec![e0, e2]);
    }

    #[test]
    fn snapshot_state_roundtrip_preserves_free_order() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<EntityId> = (0..5).map(|_| alloc.allocate()).collect();
        alloc.free(ids[3]).unwrap();
        alloc.free(ids[1]).unwrap();

        let (generations, alive, free) = alloc.snapshot_state();
        let mut restored = EntityAllocator::restore_from_snapshot(generations, alive, free);

        assert_eq!(restored.live_count(), 3);
        assert_eq!(restored.allocate(), alloc.allocate());
        assert_eq!(restored.allocate(), alloc.allocate());
    }

    #[test]
    fn entity_id_raw_roundtrip() {
        let id = EntityId::new(42, 7);
        assert_eq!(id.slot(), 42);
        assert_eq!(id.generation(), 7);
        assert_eq!(EntityId::from_raw(id.to_raw()), id);
    }
}
