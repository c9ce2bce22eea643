//! Tessera ECS -- generational entities over sparse-set component stores.
//!
//! This crate provides the state core of the Tessera simulation kernel. A
//! [`World`](world::World) owns an entity allocator and one dense store per
//! registered component type. Entity handles carry a generation counter, so a
//! handle kept past its entity's lifetime is detected rather than silently
//! aliased onto whatever reuses the slot. The whole world captures into and
//! restores from a serde-friendly [`WorldSnapshot`](snapshot::WorldSnapshot).
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Water { litres: f64 }
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Citizens(u64);
//!
//! let mut world = World::new();
//! world.register_component::<Water>("water");
//! world.register_component::<Citizens>("citizens");
//!
//! let tile = world.spawn_with((Water { litres: 10.0 }, Citizens(3))).unwrap();
//! assert_eq!(world.get_component::<Citizens>(tile), Some(&Citizens(3)));
//!
//! world.despawn(tile).unwrap();
//! assert!(!world.is_alive(tile));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod snapshot;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A handle whose slot has been reissued (or never existed) was used.
    #[error("entity {entity:?} used after free (stale generation or never allocated)")]
    UseAfterFree { entity: entity::EntityId },

    /// The latest occupant of a slot was freed a second time.
    #[error("entity {entity:?} freed twice")]
    DoubleFree { entity: entity::EntityId },

    /// The entity has no component of the requested type.
    #[error("entity {entity:?} has no '{component}' component")]
    MissingComponent {
        entity: entity::EntityId,
        component: String,
    },

    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    /// Serialization of a component value failed.
    #[error("failed to serialize component '{component}': {details}")]
    ComponentSerialization { component: String, details: String },

    /// Deserialization of a component value failed.
    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserialization { component: String, details: String },

    /// A snapshot's parts contradict each other.
    #[error("corrupt world snapshot: {details}")]
    CorruptSnapshot { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{Component, ComponentStore, StoredRow};
    pub use crate::entity::{EntityAllocator, EntityId};
    pub use crate::snapshot::{AllocatorSnapshot, WorldSnapshot};
    pub use crate::world::{Bundle, World};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
