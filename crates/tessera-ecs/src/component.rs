//! Dense per-type component storage.
//!
//! A [`ComponentStore<T>`] is a sparse set: component values live in a packed
//! `Vec<T>` (with a parallel `Vec<EntityId>` naming their owners) and a sparse
//! table maps an entity's slot to its dense index. Iteration walks the dense
//! arrays front to back, so it is contiguous and its order depends only on the
//! sequence of attach/remove calls. Removal swap-removes, moving the last value
//! into the hole.

use std::any::Any;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::EcsError;

/// Marker for types that can be stored as components.
///
/// Components must be cloneable (world forking) and serde-serializable
/// (snapshots). Implemented automatically for every qualifying type.
pub trait Component: Clone + Serialize + DeserializeOwned + 'static {}

impl<T> Component for T where T: Clone + Serialize + DeserializeOwned + 'static {}

const EMPTY: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// ComponentStore
// ---------------------------------------------------------------------------

/// Sparse-set storage for one component type.
#[derive(Debug, Clone)]
pub struct ComponentStore<T> {
    /// Slot index -> dense index, `EMPTY` when the slot has no component.
    sparse: Vec<u32>,
    /// Owner of each dense entry.
    entities: Vec<EntityId>,
    /// Component values, packed.
    values: Vec<T>,
}

impl<T> Default for ComponentStore<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            entities: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<T> ComponentStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dense index of `entity`'s component, if it has one. A handle whose
    /// generation differs from the stored owner does not match.
    #[inline]
    fn dense_index(&self, entity: EntityId) -> Option<usize> {
        let dense = *self.sparse.get(entity.slot() as usize)?;
        if dense == EMPTY {
            return None;
        }
        let dense = dense as usize;
        (self.entities[dense] == entity).then_some(dense)
    }

    /// Attach `value` to `entity`, returning the previous value if one was
    /// already attached.
    ///
    /// A new attachment is appended at the end of the dense order; an
    /// overwrite keeps its position. If the slot still holds a component of
    /// an older occupant, that value is dropped first.
    ///
    /// # Errors
    ///
    /// [`EcsError::UseAfterFree`] if the slot holds a component of a newer
    /// generation than `entity`. The store is left unchanged.
    pub fn attach(&mut self, entity: EntityId, value: T) -> Result<Option<T>, EcsError> {
        if let Some(dense) = self.dense_index(entity) {
            return Ok(Some(std::mem::replace(&mut self.values[dense], value)));
        }

        let slot = entity.slot() as usize;
        if slot >= self.sparse.len() {
            self.sparse.resize(slot + 1, EMPTY);
        } else if self.sparse[slot] != EMPTY {
            let occupant = self.entities[self.sparse[slot] as usize];
            if occupant.generation() > entity.generation() {
                tracing::warn!(%entity, %occupant, "attach through a stale entity handle refused");
                return Err(EcsError::UseAfterFree { entity });
            }
            tracing::warn!(stale = %occupant, %entity, "dropping component left behind by a stale entity");
            self.swap_remove_dense(self.sparse[slot] as usize);
        }

        self.sparse[slot] = self.entities.len() as u32;
        self.entities.push(entity);
        self.values.push(value);
        Ok(None)
    }

    /// Shared reference to `entity`'s component.
    #[inline]
    pub fn get(&self, entity: EntityId) -> Option<&T> {
        self.dense_index(entity).map(|dense| &self.values[dense])
    }

    /// Mutable reference to `entity`'s component.
    #[inline]
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        self.dense_index(entity).map(|dense| &mut self.values[dense])
    }

    /// Whether `entity` has a component in this store.
    #[inline]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.dense_index(entity).is_some()
    }

    /// Detach and return `entity`'s component.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingComponent`] if nothing is attached for this handle.
    pub fn remove(&mut self, entity: EntityId) -> Result<T, EcsError> {
        let dense = self
            .dense_index(entity)
            .ok_or_else(|| EcsError::MissingComponent {
                entity,
                component: std::any::type_name::<T>().to_owned(),
            })?;
        Ok(self.swap_remove_dense(dense))
    }

    fn swap_remove_dense(&mut self, dense: usize) -> T {
        let removed = self.entities.swap_remove(dense);
        let value = self.values.swap_remove(dense);
        self.sparse[removed.slot() as usize] = EMPTY;
        if let Some(moved) = self.entities.get(dense) {
            self.sparse[moved.slot() as usize] = dense as u32;
        }
        value
    }

    /// Iterate `(entity, &value)` pairs in dense order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (EntityId, &T)> + '_ {
        self.entities.iter().copied().zip(self.values.iter())
    }

    /// Iterate `(entity, &mut value)` pairs in dense order.
    pub fn iter_mut(&mut self) -> impl ExactSizeIterator<Item = (EntityId, &mut T)> + '_ {
        self.entities.iter().copied().zip(self.values.iter_mut())
    }

    /// Owners in dense order.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Values in dense order.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Number of attached components.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove every component.
    pub fn clear(&mut self) {
        self.sparse.clear();
        self.entities.clear();
        self.values.clear();
    }
}

// ---------------------------------------------------------------------------
// Serialized dense contents
// ---------------------------------------------------------------------------

/// One dense row of a serialized store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Owning entity.
    pub entity: EntityId,
    /// Serialized component value.
    pub value: serde_json::Value,
}

// ---------------------------------------------------------------------------
// ErasedStore -- type-erased view used by World
// ---------------------------------------------------------------------------

/// Type-erased operations the [`World`](crate::world::World) needs over every
/// store without knowing its component type.
pub(crate) trait ErasedStore {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn detach(&mut self, entity: EntityId) -> bool;
    fn contains_entity(&self, entity: EntityId) -> bool;
    fn box_clone(&self) -> Box<dyn ErasedStore>;
    fn empty_like(&self) -> Box<dyn ErasedStore>;
    fn dump(&self) -> Result<Vec<StoredRow>, String>;
    fn load(&mut self, rows: &[StoredRow]) -> Result<(), String>;
}

impl<T: Component> ErasedStore for ComponentStore<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn detach(&mut self, entity: EntityId) -> bool {
        self.remove(entity).is_ok()
    }

    fn contains_entity(&self, entity: EntityId) -> bool {
        self.contains(entity)
    }

    fn box_clone(&self) -> Box<dyn ErasedStore> {
        Box::new(self.clone())
    }

    fn empty_like(&self) -> Box<dyn ErasedStore> {
        Box::new(ComponentStore::<T>::new())
    }

    fn dump(&self) -> Result<Vec<StoredRow>, String> {
        self.iter()
            .map(|(entity, value)| {
                serde_json::to_value(value)
                    .map(|value| StoredRow { entity, value })
                    .map_err(|e| e.to_string())
            })
            .collect()
    }

    /// Replace the contents with `rows`, preserving their order as the new
    /// dense order. Nothing is modified if any row fails to decode.
    fn load(&mut self, rows: &[StoredRow]) -> Result<(), String> {
        let mut seen = std::collections::BTreeSet::new();
        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            if !seen.insert(row.entity.slot()) {
                return Err(format!("slot {} appears twice", row.entity.slot()));
            }
            let value: T = serde_json::from_value(row.value.clone())
                .map_err(|e| format!("entity {}: {e}", row.entity))?;
            decoded.push((row.entity, value));
        }
        self.clear();
        for (entity, value) in decoded {
            // Slots are unique and the store is empty, so this cannot refuse.
            self.attach(entity, value).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
