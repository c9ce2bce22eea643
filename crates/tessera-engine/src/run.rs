//! Entry points that assemble and drive a whole simulation.
//!
//! [`run`] builds the grid, world and reference pipeline for a
//! [`SimConfig`] and ticks it to completion. [`resume`] continues a run from
//! one of its checkpoints. Neither parses process arguments; that is left to
//! the binary.

use std::fmt;
use std::time::Duration;

use tessera_ecs::world::World;

use crate::components::register_all;
use crate::config::SimConfig;
use crate::rng::RngManager;
use crate::snapshot::{RetryPolicy, SnapshotKey, SnapshotManager};
use crate::spatial::SpatialGrid;
use crate::store::{DirectoryStore, SnapshotStore};
use crate::systems::{populate_world, standard_pipeline};
use crate::telemetry::TelemetryFrame;
use crate::tick::{TickConfig, TickLoop};
use crate::EngineError;

/// Callback receiving telemetry frames as they are produced.
pub type FrameSink = Box<dyn FnMut(&TelemetryFrame)>;

/// Overrides for a single invocation of [`run`] or [`resume`].
#[derive(Default)]
pub struct RunOptions {
    /// Ticks to run instead of `config.tick_count`. Ignored by [`resume`].
    pub ticks: Option<u64>,
    /// Snapshot store to use instead of a [`DirectoryStore`] under
    /// `config.snapshot.output_dir`.
    pub store: Option<Box<dyn SnapshotStore>>,
    /// Receives every telemetry frame.
    pub sink: Option<FrameSink>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("ticks", &self.ticks)
            .field("store", &self.store.as_ref().map(|_| ".."))
            .field("sink", &self.sink.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Ticks executed by this invocation.
    pub ticks_run: u64,
    /// Checkpoints written by this invocation, in tick order.
    pub checkpoints: Vec<SnapshotKey>,
    /// Hash of the final state, comparable with [`Snapshot::state_hash`](crate::snapshot::Snapshot::state_hash).
    pub final_state_hash: String,
    pub average_tick_time: Option<Duration>,
    /// Telemetry for the final tick.
    pub last_frame: TelemetryFrame,
}

/// The default scenario, for writing out as a starting configuration.
pub fn generate_config() -> SimConfig {
    SimConfig::tiny_island()
}

fn snapshot_manager(config: &SimConfig, store: Option<Box<dyn SnapshotStore>>) -> SnapshotManager {
    let store =
        store.unwrap_or_else(|| Box::new(DirectoryStore::new(config.snapshot.output_dir.clone())));
    SnapshotManager::new(config.name.clone(), config.snapshot.interval, store).with_retry(
        RetryPolicy {
            max_retries: config.snapshot.max_retries,
            backoff: Duration::from_millis(config.snapshot.retry_backoff_ms),
        },
    )
}

/// A tick loop for `config` at tick 0 with the reference pipeline
/// registered. The world is populated only when `populate` is set.
fn build_simulation(
    config: &SimConfig,
    store: Option<Box<dyn SnapshotStore>>,
    populate: bool,
) -> Result<TickLoop, EngineError> {
    config.validate()?;
    let grid = SpatialGrid::new(config.spatial.width, config.spatial.height)
        .with_toroidal(config.spatial.toroidal);
    let mut world = World::new();
    register_all(&mut world);
    let rng = RngManager::new(config.seed);
    if populate {
        populate_world(&mut world, &grid, config, &rng)?;
    }

    let mut tick_loop = TickLoop::new(
        world,
        grid,
        rng,
        TickConfig {
            dt_days: config.dt_days,
            failure_policy: config.failure_policy,
        },
    )
    .with_snapshots(snapshot_manager(config, store));
    for system in standard_pipeline(config) {
        tick_loop.add_boxed_system(system);
    }
    Ok(tick_loop)
}

fn frame_of(tick_loop: &TickLoop, config: &SimConfig) -> TelemetryFrame {
    TelemetryFrame::collect(
        tick_loop.world(),
        tick_loop.grid(),
        config.spatial.region_size,
        tick_loop.tick_count(),
        tick_loop.days_elapsed(),
    )
}

fn drive(
    tick_loop: &mut TickLoop,
    config: &SimConfig,
    ticks: u64,
    mut sink: Option<FrameSink>,
) -> Result<RunSummary, EngineError> {
    let mut checkpoints = Vec::new();
    let mut last_frame = None;

    for _ in 0..ticks {
        let report = tick_loop.tick()?;
        let emit = config.telemetry.every_tick || report.checkpoint.is_some();
        if let Some(key) = report.checkpoint {
            checkpoints.push(key);
        }
        if emit {
            let frame = frame_of(tick_loop, config);
            if let Some(sink) = sink.as_mut() {
                sink(&frame);
            }
            last_frame = Some(frame);
        } else {
            last_frame = None;
        }
    }

    let last_frame = last_frame.unwrap_or_else(|| frame_of(tick_loop, config));
    let summary = RunSummary {
        ticks_run: ticks,
        checkpoints,
        final_state_hash: tick_loop.state_hash()?,
        average_tick_time: tick_loop.average_tick_time(),
        last_frame,
    };
    tracing::info!(
        scenario = %config.name,
        tick = tick_loop.tick_count(),
        population = summary.last_frame.total_population,
        checkpoints = summary.checkpoints.len(),
        hash = %summary.final_state_hash,
        "run finished"
    );
    Ok(summary)
}

/// Build the scenario described by `config` and run it.
///
/// Runs `options.ticks` ticks, or `config.tick_count` if unset. Checkpoints
/// go to `options.store`, or to a [`DirectoryStore`] rooted at
/// `config.snapshot.output_dir`.
///
/// # Errors
///
/// An invalid configuration, a fatal system failure under the halting
/// policy, or a snapshot write that could not be completed.
pub fn run(config: &SimConfig, options: RunOptions) -> Result<RunSummary, EngineError> {
    let ticks = options.ticks.unwrap_or(config.tick_count);
    let mut tick_loop = build_simulation(config, options.store, true)?;
    tracing::info!(
        scenario = %config.name,
        seed = config.seed,
        ticks,
        width = config.spatial.width,
        height = config.spatial.height,
        "run started"
    );
    drive(&mut tick_loop, config, ticks, options.sink)
}

/// Restore the checkpoint under `key` and run `extra_ticks` more ticks with
/// the reference pipeline.
///
/// `config` must describe the same scenario that wrote the checkpoint; its
/// seed and population settings are superseded by the restored state.
///
/// # Errors
///
/// As [`run`], plus any failure loading or verifying the checkpoint.
pub fn resume(
    config: &SimConfig,
    key: &SnapshotKey,
    extra_ticks: u64,
    options: RunOptions,
) -> Result<RunSummary, EngineError> {
    let mut tick_loop = build_simulation(config, options.store, false)?;
    tick_loop.resume_from(key)?;
    tracing::info!(scenario = %config.name, tick = key.tick, extra_ticks, "run resumed");
    drive(&mut tick_loop, config, extra_ticks, options.sink)
}
