//! Tessera Engine -- deterministic tick-based simulation kernel.
//!
//! This crate builds on [`tessera_ecs`] to provide the simulation driver: a
//! tick loop that runs an ordered pipeline of systems, counter-based random
//! streams per system and per entity, a fixed tile grid, and periodic
//! checkpointing that can be resumed bit-for-bit.
//!
//! The [`run`] entry point wires all of it together for a [`SimConfig`].
//!
//! # Quick Start
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! let mut config = SimConfig::tiny_island();
//! config.spatial.width = 16;
//! config.spatial.height = 8;
//! config.population.persons = 500;
//! config.tick_count = 10;
//! config.snapshot.interval = 5;
//!
//! let options = RunOptions {
//!     store: Some(Box::new(MemoryStore::new())),
//!     ..Default::default()
//! };
//! let summary = tessera_engine::run(&config, options).unwrap();
//! assert_eq!(summary.ticks_run, 10);
//! assert_eq!(summary.checkpoints.len(), 2);
//! ```

#![deny(unsafe_code)]

pub mod components;
pub mod config;
pub mod rng;
pub mod run;
pub mod snapshot;
pub mod spatial;
pub mod store;
pub mod systems;
pub mod telemetry;
pub mod tick;

pub use config::SimConfig;
pub use run::{generate_config, resume, run, RunOptions, RunSummary};

/// Re-export the ECS crate for convenience.
pub use tessera_ecs;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that stop or refuse a run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A system failed under the halting policy.
    #[error("system '{system}' failed at tick {tick}: {source}")]
    SystemFailure {
        system: String,
        tick: u64,
        #[source]
        source: tick::SystemError,
    },

    /// The loop was halted by an earlier failure and refuses to tick.
    #[error("run halted at tick {tick} after system '{system}' failed")]
    Halted { tick: u64, system: String },

    #[error("no snapshot manager is attached to this tick loop")]
    NoSnapshotManager,

    #[error(transparent)]
    Snapshot(#[from] snapshot::SnapshotError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Ecs(#[from] tessera_ecs::EcsError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use tessera_ecs::prelude::*;

    pub use crate::components::{
        Environment, LandCover, LandUse, Location, Population, ResourceStock,
    };
    pub use crate::config::{ConfigError, SimConfig};
    pub use crate::rng::{EntityRng, RngManager, RngState, SystemRng};
    pub use crate::run::{RunOptions, RunSummary};
    pub use crate::snapshot::{
        RetryPolicy, Snapshot, SnapshotError, SnapshotKey, SnapshotManager,
    };
    pub use crate::spatial::{SpatialError, SpatialGrid, TileId, TilePos};
    pub use crate::store::{DirectoryStore, MemoryStore, SnapshotStore};
    pub use crate::systems::standard_pipeline;
    pub use crate::telemetry::{RegionMetrics, TelemetryFrame};
    pub use crate::tick::{
        FailurePolicy, RunMode, System, SystemContext, SystemError, SystemFn, SystemStats,
        TickConfig, TickLoop, TickReport, TickStats,
    };
    pub use crate::EngineError;
}
