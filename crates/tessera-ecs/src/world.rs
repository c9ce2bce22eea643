//! The [`World`] is the composition root of the ECS. It owns the entity
//! allocator and one [`ComponentStore`] per registered component type, and is
//! the only surface through which simulation state is mutated.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::component::{Component, ComponentStore, ErasedStore};
use crate::entity::{EntityAllocator, EntityId};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Store registry entry
// ---------------------------------------------------------------------------

struct StoreEntry {
    name: String,
    store: Box<dyn ErasedStore>,
}

impl Clone for StoreEntry {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: self.store.box_clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Owner of every entity and component.
///
/// Component types are registered up front under a stable string name; the
/// name keys the type's table in snapshots. Stores are kept in registration
/// order, and despawning walks them in that order.
#[derive(Clone, Default)]
pub struct World {
    pub(crate) allocator: EntityAllocator,
    stores: Vec<StoreEntry>,
    by_type: HashMap<TypeId, usize>,
    by_name: BTreeMap<String, usize>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.allocator.live_count())
            .field("components", &self.component_names())
            .finish()
    }
}

impl World {
    /// Create an empty world with no registered components.
    pub fn new() -> Self {
        Self::default()
    }

    // -- registration -------------------------------------------------------

    /// Register a component type under `name`.
    ///
    /// Registering the same Rust type again is a no-op (the new name is
    /// ignored).
    ///
    /// # Panics
    ///
    /// Panics if `name` is already taken by a different type.
    pub fn register_component<T: Component>(&mut self, name: &str) {
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return;
        }
        if self.by_name.contains_key(name) {
            panic!(
                "component name '{}' is already registered for a different type",
                name
            );
        }
        let idx = self.stores.len();
        self.stores.push(StoreEntry {
            name: name.to_owned(),
            store: Box::new(ComponentStore::<T>::new()),
        });
        self.by_type.insert(type_id, idx);
        self.by_name.insert(name.to_owned(), idx);
    }

    /// Whether `T` has been registered.
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Registered component names, sorted.
    pub fn component_names(&self) -> Vec<&str> {
        self.by_name.keys().map(String::as_str).collect()
    }

    /// The name `T` was registered under.
    pub fn component_name<T: 'static>(&self) -> Option<&str> {
        let idx = *self.by_type.get(&TypeId::of::<T>())?;
        Some(self.stores[idx].name.as_str())
    }

    fn unknown<T>(&self) -> EcsError {
        EcsError::UnknownComponent {
            name: std::any::type_name::<T>().to_owned(),
            registered: self.component_names().join(", "),
        }
    }

    // -- typed store access -------------------------------------------------

    /// Shared access to the store for `T`.
    pub fn store<T: Component>(&self) -> Option<&ComponentStore<T>> {
        let idx = *self.by_type.get(&TypeId::of::<T>())?;
        self.stores[idx].store.as_any().downcast_ref()
    }

    /// Mutable access to the store for `T`.
    pub fn store_mut<T: Component>(&mut self) -> Option<&mut ComponentStore<T>> {
        let idx = *self.by_type.get(&TypeId::of::<T>())?;
        self.stores[idx].store.as_any_mut().downcast_mut()
    }

    /// Mutable access to the store for `A` together with shared access to the
    /// store for `B`, for systems that update one component while reading
    /// another.
    ///
    /// # Panics
    ///
    /// Panics if `A` and `B` are the same type.
    pub fn store_pair_mut<A: Component, B: Component>(
        &mut self,
    ) -> Option<(&mut ComponentStore<A>, &ComponentStore<B>)> {
        let a = *self.by_type.get(&TypeId::of::<A>())?;
        let b = *self.by_type.get(&TypeId::of::<B>())?;
        assert_ne!(a, b, "store_pair_mut requires two distinct component types");

        let (a_entry, b_entry) = if a < b {
            let (lo, hi) = self.stores.split_at_mut(b);
            (&mut lo[a], &hi[0])
        } else {
            let (lo, hi) = self.stores.split_at_mut(a);
            (&mut hi[0], &lo[b])
        };
        let a_store: &mut ComponentStore<A> = a_entry.store.as_any_mut().downcast_mut()?;
        let b_store: &ComponentStore<B> = b_entry.store.as_any().downcast_ref()?;
        Some((a_store, b_store))
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Allocate a new entity with no components.
    pub fn spawn(&mut self) -> EntityId {
        self.allocator.allocate()
    }

    /// Allocate a new entity and attach every component in `bundle`.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponent`] if any bundle member is unregistered.
    /// Nothing is allocated in that case.
    pub fn spawn_with<B: Bundle>(&mut self, bundle: B) -> Result<EntityId, EcsError> {
        B::check_registered(self)?;
        let entity = self.allocator.allocate();
        bundle.attach_all(self, entity)?;
        Ok(entity)
    }

    /// Destroy `entity`, detaching it from every store that holds it.
    ///
    /// # Errors
    ///
    /// [`EcsError::DoubleFree`] or [`EcsError::UseAfterFree`] if the handle
    /// is not live; the world is unchanged.
    pub fn despawn(&mut self, entity: EntityId) -> Result<(), EcsError> {
        if !self.allocator.is_alive(entity) {
            return self.allocator.free(entity);
        }
        for entry in &mut self.stores {
            entry.store.detach(entity);
        }
        self.allocator.free(entity)
    }

    /// Whether `entity` is live.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.allocator.live_count()
    }

    /// Read-only access to the allocator.
    pub fn allocator(&self) -> &EntityAllocator {
        &self.allocator
    }

    // -- per-entity component access ----------------------------------------

    /// Attach `value` to a live entity, returning the previous value.
    ///
    /// # Errors
    ///
    /// [`EcsError::UseAfterFree`] for a dead handle,
    /// [`EcsError::UnknownComponent`] if `T` is unregistered.
    pub fn insert_component<T: Component>(
        &mut self,
        entity: EntityId,
        value: T,
    ) -> Result<Option<T>, EcsError> {
        if !self.allocator.is_alive(entity) {
            return Err(EcsError::UseAfterFree { entity });
        }
        if !self.is_registered::<T>() {
            return Err(self.unknown::<T>());
        }
        match self.store_mut::<T>() {
            Some(store) => store.attach(entity, value),
            None => Err(self.unknown::<T>()),
        }
    }

    /// Detach and return `entity`'s `T`.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingComponent`] if the entity has no `T` (including
    /// when the handle is stale), [`EcsError::UnknownComponent`] if `T` is
    /// unregistered.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<T, EcsError> {
        if !self.is_registered::<T>() {
            return Err(self.unknown::<T>());
        }
        match self.store_mut::<T>() {
            Some(store) => store.remove(entity),
            None => Err(EcsError::MissingComponent {
                entity,
                component: std::any::type_name::<T>().to_owned(),
            }),
        }
    }

    /// Shared reference to `entity`'s `T`, if present.
    pub fn get_component<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.store::<T>()?.get(entity)
    }

    /// Mutable reference to `entity`'s `T`, if present.
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.store_mut::<T>()?.get_mut(entity)
    }

    /// Like [`get_component`](Self::get_component) but reports absence as
    /// [`EcsError::MissingComponent`], for callers that branch on it.
    pub fn try_component<T: Component>(&self, entity: EntityId) -> Result<&T, EcsError> {
        self.get_component(entity)
            .ok_or_else(|| EcsError::MissingComponent {
                entity,
                component: self
                    .component_name::<T>()
                    .unwrap_or(std::any::type_name::<T>())
                    .to_owned(),
            })
    }

    /// Whether `entity` has a `T`.
    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        self.store::<T>().is_some_and(|s| s.contains(entity))
    }

    /// Number of components attached to `entity` across all stores.
    pub fn component_count(&self, entity: EntityId) -> usize {
        self.stores
            .iter()
            .filter(|entry| entry.store.contains_entity(entity))
            .count()
    }

    // -- crate-internal access for snapshot/restore -------------------------

    pub(crate) fn store_entries(
        &self,
    ) -> impl Iterator<Item = (&str, &dyn ErasedStore)> + '_ {
        self.stores
            .iter()
            .map(|entry| (entry.name.as_str(), entry.store.as_ref()))
    }

    pub(crate) fn store_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn erased_store(&self, idx: usize) -> &dyn ErasedStore {
        self.stores[idx].store.as_ref()
    }

    pub(crate) fn replace_stores(&mut self, replacements: Vec<Box<dyn ErasedStore>>) {
        debug_assert_eq!(replacements.len(), self.stores.len());
        for (entry, store) in self.stores.iter_mut().zip(replacements) {
            entry.store = store;
        }
    }

    pub(crate) fn store_len(&self) -> usize {
        self.stores.len()
    }
}

// ---------------------------------------------------------------------------
// Bundle -- tuples of components spawned together
// ---------------------------------------------------------------------------

/// A set of components attached together by [`World::spawn_with`].
///
/// Implemented for tuples of up to six [`Component`]s.
pub trait Bundle {
    /// Verify every member type is registered in `world`.
    fn check_registered(world: &World) -> Result<(), EcsError>;
    /// Attach every member to `entity`. Only called after
    /// [`check_registered`](Self::check_registered) succeeded.
    fn attach_all(self, world: &mut World, entity: EntityId) -> Result<(), EcsError>;
}

macro_rules! impl_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> Bundle for ($($name,)+) {
            fn check_registered(world: &World) -> Result<(), EcsError> {
                $(
                    if !world.is_registered::<$name>() {
                        return Err(world.unknown::<$name>());
                    }
                )+
                Ok(())
            }

            #[allow(non_snake_case)]
            fn attach_all(self, world: &mut World, entity: EntityId) -> Result<(), EcsError> {
                let ($($name,)+) = self;
                $(
                    if let Some(store) = world.store_mut::<$name>() {
                        store.attach(entity, $name)?;
                    }
                )+
                Ok(())
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
