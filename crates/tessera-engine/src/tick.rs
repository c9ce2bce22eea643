//! Deterministic tick loop and system scheduler.
//!
//! The [`TickLoop`] drives the simulation forward. Each tick:
//!
//! 1. The tick counter advances.
//! 2. The [`RngManager`] moves to the new tick, dropping cached streams.
//! 3. Every registered [`System`] runs in registration order with exclusive
//!    access to the [`World`] and its own random stream, and is timed.
//! 4. The tick's duration joins a rolling statistics window.
//! 5. The [`SnapshotManager`], if attached, writes a checkpoint when due.
//!
//! Systems run strictly one after another and draw randomness only from
//! streams derived from `(seed, system name, tick)`, so the same initial world,
//! seed and pipeline produce the same states on every run.
//!
//! # Example
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! let mut world = World::new();
//! world.register_component::<u64>("counter");
//! let grid = SpatialGrid::new(4, 4);
//! let mut tick_loop = TickLoop::new(world, grid, RngManager::new(7), TickConfig::default());
//!
//! tick_loop.add_system_fn("noop", |_ctx, _world, _rng| Ok(()));
//! tick_loop.run_ticks(10).unwrap();
//!
//! assert_eq!(tick_loop.tick_count(), 10);
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tessera_ecs::entity::EntityId;
use tessera_ecs::world::World;
use tessera_ecs::EcsError;

use crate::rng::{RngManager, SystemRng};
use crate::snapshot::{SnapshotKey, SnapshotManager};
use crate::spatial::{SpatialError, SpatialGrid};
use crate::EngineError;

/// Number of ticks kept in the rolling statistics window.
pub const STATS_WINDOW: usize = 100;

// ---------------------------------------------------------------------------
// Failure policy and run mode
// ---------------------------------------------------------------------------

/// What the loop does when a system reports failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run. The strict, reproducible default.
    #[default]
    Halt,
    /// Log the failure, skip the system for this tick and carry on. Marks the
    /// run exploratory; its results are no longer guaranteed reproducible.
    SkipAndLog,
}

/// Whether a run still carries the reproducibility guarantee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Strict,
    /// At least one failed system was skipped.
    Exploratory,
}

// ---------------------------------------------------------------------------
// SystemError
// ---------------------------------------------------------------------------

/// A system's report that it could not complete its update.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("{0}")]
    Failed(String),

    #[error("component '{component}' of entity {entity} is not finite")]
    NonFinite {
        component: &'static str,
        entity: EntityId,
    },

    #[error(transparent)]
    Ecs(#[from] EcsError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SystemError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Read-only per-tick context handed to every system.
#[derive(Debug, Clone, Copy)]
pub struct SystemContext<'a> {
    /// The tick being executed (1 for the first tick).
    pub tick: u64,
    /// Logical days covered by one tick.
    pub dt_days: f64,
    /// Logical days elapsed at the end of this tick.
    pub days_elapsed: f64,
    pub grid: &'a SpatialGrid,
}

/// One stage of the per-tick pipeline.
///
/// Systems are stateless between ticks: everything they need lives in the
/// world, the context or the random stream. The name identifies the system
/// in the registry, in statistics and as the key of its random stream.
pub trait System {
    fn name(&self) -> &str;

    fn run(
        &self,
        ctx: &SystemContext<'_>,
        world: &mut World,
        rng: &mut SystemRng,
    ) -> Result<(), SystemError>;
}

/// Signature of a plain-function system.
pub type SystemFn =
    fn(&SystemContext<'_>, &mut World, &mut SystemRng) -> Result<(), SystemError>;

struct FnSystem {
    name: String,
    func: SystemFn,
}

impl System for FnSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        ctx: &SystemContext<'_>,
        world: &mut World,
        rng: &mut SystemRng,
    ) -> Result<(), SystemError> {
        (self.func)(ctx, world, rng)
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Cumulative timing of one system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemStats {
    pub count: u64,
    pub total: Duration,
    pub last: Duration,
}

impl SystemStats {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.last = elapsed;
    }

    /// Mean time per invocation.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total.as_nanos() / u128::from(self.count);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

/// Timing of one completed tick.
#[derive(Debug, Clone, Default)]
pub struct TickStats {
    pub tick: u64,
    /// Wall-clock time for the tick up to checkpointing.
    pub duration: Duration,
    /// Wall-clock time per system, in execution order.
    pub system_times: Vec<(String, Duration)>,
}

/// What a successful [`TickLoop::tick`] did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    /// Wall-clock time for the whole tick, checkpointing included.
    pub duration: Duration,
    /// Key of the checkpoint written at this tick, if any.
    pub checkpoint: Option<SnapshotKey>,
    /// Systems that failed and were skipped under [`FailurePolicy::SkipAndLog`].
    pub skipped: Vec<String>,
}

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct TickConfig {
    /// Logical days per tick. Must be positive and finite.
    pub dt_days: f64,
    pub failure_policy: FailurePolicy,
}

impl Default for TickConfig {
    /// One day per tick, halting on failure.
    fn default() -> Self {
        Self {
            dt_days: 1.0,
            failure_policy: FailurePolicy::Halt,
        }
    }
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

struct RegisteredSystem {
    system: Box<dyn System>,
    stats: SystemStats,
}

/// Why a loop stopped accepting ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HaltInfo {
    pub tick: u64,
    pub system: String,
}

/// The deterministic tick loop. Owns the world for the whole run.
pub struct TickLoop {
    pub(crate) world: World,
    pub(crate) grid: SpatialGrid,
    pub(crate) rng: RngManager,
    systems: Vec<RegisteredSystem>,
    pub(crate) tick_counter: u64,
    dt_days: f64,
    failure_policy: FailurePolicy,
    pub(crate) mode: RunMode,
    pub(crate) halted: Option<HaltInfo>,
    sealed: bool,
    pub(crate) snapshots: Option<SnapshotManager>,
    recent: VecDeque<TickStats>,
}

impl TickLoop {
    /// Create a loop at tick 0.
    ///
    /// # Panics
    ///
    /// Panics if `config.dt_days` is not positive and finite.
    pub fn new(world: World, grid: SpatialGrid, rng: RngManager, config: TickConfig) -> Self {
        assert!(
            config.dt_days > 0.0 && config.dt_days.is_finite(),
            "dt_days must be positive and finite, got {}",
            config.dt_days
        );
        let tick_counter = rng.tick();
        Self {
            world,
            grid,
            rng,
            systems: Vec::new(),
            tick_counter,
            dt_days: config.dt_days,
            failure_policy: config.failure_policy,
            mode: RunMode::Strict,
            halted: None,
            sealed: false,
            snapshots: None,
            recent: VecDeque::with_capacity(STATS_WINDOW),
        }
    }

    /// Attach a snapshot manager; it is consulted after every tick.
    pub fn with_snapshots(mut self, manager: SnapshotManager) -> Self {
        self.snapshots = Some(manager);
        self
    }

    // -- registration -------------------------------------------------------

    /// Append a system to the pipeline.
    ///
    /// # Panics
    ///
    /// - If a system with the same name is already registered.
    /// - If the loop has already ticked.
    pub fn add_system(&mut self, system: impl System + 'static) {
        let at = self.systems.len();
        self.insert_system(at, Box::new(system));
    }

    /// Append an already boxed system.
    pub fn add_boxed_system(&mut self, system: Box<dyn System>) {
        let at = self.systems.len();
        self.insert_system(at, system);
    }

    /// Append a plain function as a system named `name`.
    pub fn add_system_fn(&mut self, name: &str, func: SystemFn) {
        self.add_system(FnSystem {
            name: name.to_owned(),
            func,
        });
    }

    /// Insert a system immediately before `anchor`.
    ///
    /// # Panics
    ///
    /// Panics if `anchor` is not registered, plus the [`add_system`](Self::add_system) cases.
    pub fn add_system_before(&mut self, anchor: &str, system: impl System + 'static) {
        let at = self.anchor_index(anchor, system.name());
        self.insert_system(at, Box::new(system));
    }

    /// Insert a system immediately after `anchor`.
    ///
    /// # Panics
    ///
    /// Panics if `anchor` is not registered, plus the [`add_system`](Self::add_system) cases.
    pub fn add_system_after(&mut self, anchor: &str, system: impl System + 'static) {
        let at = self.anchor_index(anchor, system.name()) + 1;
        self.insert_system(at, Box::new(system));
    }

    fn anchor_index(&self, anchor: &str, name: &str) -> usize {
        match self.systems.iter().position(|s| s.system.name() == anchor) {
            Some(idx) => idx,
            None => panic!("system '{name}' is anchored on '{anchor}', but '{anchor}' is not registered"),
        }
    }

    fn insert_system(&mut self, at: usize, system: Box<dyn System>) {
        let name = system.name().to_owned();
        assert!(
            !self.sealed,
            "cannot register system '{name}' after the first tick"
        );
        assert!(
            !self.systems.iter().any(|s| s.system.name() == name),
            "duplicate system name: {name:?}"
        );
        self.systems.insert(
            at,
            RegisteredSystem {
                system,
                stats: SystemStats::default(),
            },
        );
    }

    // -- execution ----------------------------------------------------------

    /// Execute one tick.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Halted`] if an earlier tick halted the loop; nothing runs.
    /// - [`EngineError::SystemFailure`] if a system fails under
    ///   [`FailurePolicy::Halt`]. The remaining systems of the tick do not run
    ///   and the loop is flagged halted, since the world may be partially updated.
    /// - [`EngineError::Snapshot`] if a due checkpoint could not be written.
    ///   The tick itself completed, so the loop stays usable.
    pub fn tick(&mut self) -> Result<TickReport, EngineError> {
        if let Some(halt) = &self.halted {
            return Err(EngineError::Halted {
                tick: halt.tick,
                system: halt.system.clone(),
            });
        }
        self.sealed = true;
        let tick_start = Instant::now();

        // Phase 1: advance the counters.
        self.tick_counter += 1;
        let tick = self.tick_counter;
        self.rng.advance_to(tick);

        // Phase 2: run every system in order.
        let ctx = SystemContext {
            tick,
            dt_days: self.dt_days,
            days_elapsed: tick as f64 * self.dt_days,
            grid: &self.grid,
        };
        let mut system_times = Vec::with_capacity(self.systems.len());
        let mut skipped = Vec::new();
        for entry in &mut self.systems {
            let name = entry.system.name();
            let stream = self.rng.system_stream(name);
            let sys_start = Instant::now();
            let result = entry.system.run(&ctx, &mut self.world, stream);
            let elapsed = sys_start.elapsed();
            entry.stats.record(elapsed);
            system_times.push((name.to_owned(), elapsed));
            tracing::debug!(tick, system = name, elapsed_us = elapsed.as_micros() as u64, "system finished");

            if let Err(source) = result {
                match self.failure_policy {
                    FailurePolicy::Halt => {
                        tracing::error!(tick, system = name, error = %source, "system failed; halting run");
                        self.halted = Some(HaltInfo {
                            tick,
                            system: name.to_owned(),
                        });
                        return Err(EngineError::SystemFailure {
                            system: name.to_owned(),
                            tick,
                            source,
                        });
                    }
                    FailurePolicy::SkipAndLog => {
                        tracing::warn!(tick, system = name, error = %source, "system failed; skipped (exploratory mode)");
                        self.mode = RunMode::Exploratory;
                        skipped.push(name.to_owned());
                    }
                }
            }
        }

        // Phase 3: rolling statistics. Recorded before checkpointing so a
        // failed write does not lose a completed tick.
        if self.recent.len() == STATS_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(TickStats {
            tick,
            duration: tick_start.elapsed(),
            system_times,
        });

        // Phase 4: checkpoint when due.
        let checkpoint = match &mut self.snapshots {
            Some(manager) => {
                manager.maybe_checkpoint(tick, &self.world, self.rng.state(), self.mode)?
            }
            None => None,
        };

        Ok(TickReport {
            tick,
            duration: tick_start.elapsed(),
            checkpoint,
            skipped,
        })
    }

    /// Run `count` ticks, stopping at the first error.
    pub fn run_ticks(&mut self, count: u64) -> Result<(), EngineError> {
        for _ in 0..count {
            self.tick()?;
        }
        Ok(())
    }

    /// Run up to `count` ticks, checking `should_stop` before each one.
    ///
    /// Cancellation only ever happens between ticks. Returns the number of
    /// ticks actually executed.
    pub fn run_ticks_until(
        &mut self,
        count: u64,
        mut should_stop: impl FnMut(&TickLoop) -> bool,
    ) -> Result<u64, EngineError> {
        let mut ran = 0;
        while ran < count {
            if should_stop(self) {
                tracing::info!(tick = self.tick_counter, "run cancelled between ticks");
                break;
            }
            self.tick()?;
            ran += 1;
        }
        Ok(ran)
    }

    // -- accessors ----------------------------------------------------------

    /// Number of ticks executed so far (or restored from a snapshot).
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    pub fn dt_days(&self) -> f64 {
        self.dt_days
    }

    /// Logical days elapsed, computed as `tick_count * dt_days` to avoid
    /// drift from repeated addition.
    pub fn days_elapsed(&self) -> f64 {
        self.tick_counter as f64 * self.dt_days
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the world, for setup and tests. Never call while
    /// a tick is in progress (the borrow checker already forbids it).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn rng(&self) -> &RngManager {
        &self.rng
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn snapshots(&self) -> Option<&SnapshotManager> {
        self.snapshots.as_ref()
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Registered system names, in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.system.name()).collect()
    }

    /// Cumulative timing of the system named `name`.
    pub fn system_stats(&self, name: &str) -> Option<&SystemStats> {
        self.systems
            .iter()
            .find(|s| s.system.name() == name)
            .map(|s| &s.stats)
    }

    /// Timing of the most recent ticks, oldest first, at most [`STATS_WINDOW`].
    pub fn recent_ticks(&self) -> impl Iterator<Item = &TickStats> + '_ {
        self.recent.iter()
    }

    /// Timing of the last completed tick.
    pub fn last_tick_stats(&self) -> Option<&TickStats> {
        self.recent.back()
    }

    /// Mean tick duration over the rolling window.
    pub fn average_tick_time(&self) -> Option<Duration> {
        if self.recent.is_empty() {
            return None;
        }
        let total: Duration = self.recent.iter().map(|t| t.duration).sum();
        Some(total / self.recent.len() as u32)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use tessera_ecs::prelude::*;

    // -- test component types -----------------------------------------------

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Counter(u64);

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Trace(Vec<String>);

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Counter>("counter");
        world.register_component::<Trace>("trace");
        world
    }

    fn build_tick_loop(policy: FailurePolicy) -> (TickLoop, EntityId) {
        let mut world = setup_world();
        let e = world
            .spawn_with((Counter(0), Trace(Vec::new())))
            .unwrap();
        let config = TickConfig {
            dt_days: 0.5,
            failure_policy: policy,
        };
        let tick_loop = TickLoop::new(world, SpatialGrid::new(4, 4), RngManager::new(11), config);
        (tick_loop, e)
    }

    fn push_trace(world: &mut World, label: &str) {
        for (_, trace) in world.store_mut::<Trace>().unwrap().iter_mut() {
            trace.0.push(label.to_owned());
        }
    }

    struct Tracer(&'static str);

    impl System for Tracer {
        fn name(&self) -> &str {
            self.0
        }

        fn run(
            &self,
            _ctx: &SystemContext<'_>,
            world: &mut World,
            _rng: &mut SystemRng,
        ) -> Result<(), SystemError> {
            push_trace(world, self.0);
            Ok(())
        }
    }

    fn increment(_: &SystemContext<'_>, world: &mut World, _: &mut SystemRng) -> Result<(), SystemError> {
        for (_, c) in world.store_mut::<Counter>().unwrap().iter_mut() {
            c.0 += 1;
        }
        Ok(())
    }

    fn always_fails(_: &SystemContext<'_>, _: &mut World, _: &mut SystemRng) -> Result<(), SystemError> {
        Err(SystemError::failed("boom"))
    }

    // -- 1. Construction ----------------------------------------------------

    #[test]
    fn new_tick_loop_starts_at_zero() {
        let (tick_loop, _) = build_tick_loop(FailurePolicy::Halt);
        assert_eq!(tick_loop.tick_count(), 0);
        assert_eq!(tick_loop.days_elapsed(), 0.0);
        assert_eq!(tick_loop.system_count(), 0);
        assert_eq!(tick_loop.mode(), RunMode::Strict);
        assert!(tick_loop.average_tick_time().is_none());
    }

    #[test]
    #[should_panic(expected = "dt_days must be positive")]
    fn zero_dt_panics() {
        let config = TickConfig {
            dt_days: 0.0,
            ..Default::default()
        };
        TickLoop::new(World::new(), SpatialGrid::new(1, 1), RngManager::new(0), config);
    }

    #[test]
    #[should_panic(expected = "dt_days must be positive")]
    fn nan_dt_panics() {
        let config = TickConfig {
            dt_days: f64::NAN,
            ..Default::default()
        };
        TickLoop::new(World::new(), SpatialGrid::new(1, 1), RngManager::new(0), config);
    }

    // -- 2. Registration ----------------------------------------------------

    #[test]
    fn systems_run_in_registration_order() {
        let (mut tick_loop, e) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system(Tracer("alpha"));
        tick_loop.add_system(Tracer("beta"));
        tick_loop.add_system(Tracer("gamma"));
        tick_loop.tick().unwrap();

        let trace = tick_loop.world().get_component::<Trace>(e).unwrap();
        assert_eq!(trace.0, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn insert_before_and_after_anchor() {
        let (mut tick_loop, e) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system(Tracer("environment"));
        tick_loop.add_system(Tracer("bookkeeping"));
        tick_loop.add_system_before("bookkeeping", Tracer("population"));
        tick_loop.add_system_after("bookkeeping", Tracer("telemetry"));
        tick_loop.add_system_before("environment", Tracer("climate"));

        assert_eq!(
            tick_loop.system_names(),
            vec!["climate", "environment", "population", "bookkeeping", "telemetry"]
        );
        tick_loop.tick().unwrap();
        let trace = tick_loop.world().get_component::<Trace>(e).unwrap();
        assert_eq!(trace.0.len(), 5);
        assert_eq!(trace.0[0], "climate");
    }

    #[test]
    #[should_panic(expected = "duplicate system name")]
    fn duplicate_system_name_panics() {
        let (mut tick_loop, _) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system_fn("increment", increment);
        tick_loop.add_system_fn("increment", increment);
    }

    #[test]
    #[should_panic(expected = "is not registered")]
    fn unknown_anchor_panics() {
        let (mut tick_loop, _) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system_after("missing", Tracer("late"));
    }

    #[test]
    #[should_panic(expected = "after the first tick")]
    fn registration_is_sealed_after_first_tick() {
        let (mut tick_loop, _) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.tick().unwrap();
        tick_loop.add_system_fn("increment", increment);
    }

    // -- 3. Ticking ---------------------------------------------------------

    #[test]
    fn tick_advances_counter_and_rng() {
        let (mut tick_loop, e) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system_fn("increment", increment);
        tick_loop.run_ticks(4).unwrap();

        assert_eq!(tick_loop.tick_count(), 4);
        assert_eq!(tick_loop.rng().tick(), 4);
        assert_eq!(tick_loop.days_elapsed(), 2.0);
        assert_eq!(tick_loop.world().get_component::<Counter>(e), Some(&Counter(4)));
    }

    #[test]
    fn context_carries_tick_and_days() {
        fn check(ctx: &SystemContext<'_>, world: &mut World, _: &mut SystemRng) -> Result<(), SystemError> {
            for (_, c) in world.store_mut::<Counter>().unwrap().iter_mut() {
                c.0 = ctx.tick * 100 + (ctx.days_elapsed * 10.0) as u64;
            }
            assert_eq!(ctx.grid.tile_count(), 16);
            Ok(())
        }
        let (mut tick_loop, e) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system_fn("check", check);
        tick_loop.run_ticks(3).unwrap();
        // tick 3, 1.5 days elapsed
        assert_eq!(tick_loop.world().get_component::<Counter>(e), Some(&Counter(315)));
    }

    #[test]
    fn system_stream_matches_manager_derivation() {
        fn draw(_: &SystemContext<'_>, world: &mut World, rng: &mut SystemRng) -> Result<(), SystemError> {
            let v: u64 = rng.gen();
            for (_, c) in world.store_mut::<Counter>().unwrap().iter_mut() {
                c.0 = v;
            }
            Ok(())
        }
        let (mut tick_loop, e) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system_fn("draw", draw);
        tick_loop.run_ticks(2).unwrap();

        let expected: u64 = RngManager::new(11).derive_stream("draw", 2).gen();
        assert_eq!(tick_loop.world().get_component::<Counter>(e), Some(&Counter(expected)));
    }

    // -- 4. Failure policy --------------------------------------------------

    #[test]
    fn halt_policy_stops_pipeline_and_flags_loop() {
        let (mut tick_loop, e) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system_fn("failing", always_fails);
        tick_loop.add_system_fn("increment", increment);

        match tick_loop.tick() {
            Err(EngineError::SystemFailure { system, tick, .. }) => {
                assert_eq!(system, "failing");
                assert_eq!(tick, 1);
            }
            other => panic!("expected SystemFailure, got {other:?}"),
        }
        assert!(tick_loop.is_halted());
        // The later system never ran.
        assert_eq!(tick_loop.world().get_component::<Counter>(e), Some(&Counter(0)));

        assert!(matches!(
            tick_loop.tick(),
            Err(EngineError::Halted { tick: 1, .. })
        ));
        assert_eq!(tick_loop.tick_count(), 1);
    }

    #[test]
    fn skip_and_log_continues_in_exploratory_mode() {
        let (mut tick_loop, e) = build_tick_loop(FailurePolicy::SkipAndLog);
        tick_loop.add_system_fn("failing", always_fails);
        tick_loop.add_system_fn("increment", increment);

        let report = tick_loop.tick().unwrap();
        assert_eq!(report.skipped, vec!["failing".to_owned()]);
        tick_loop.tick().unwrap();

        assert_eq!(tick_loop.mode(), RunMode::Exploratory);
        assert!(!tick_loop.is_halted());
        assert_eq!(tick_loop.world().get_component::<Counter>(e), Some(&Counter(2)));
    }

    // -- 5. Statistics ------------------------------------------------------

    #[test]
    fn per_system_stats_accumulate() {
        let (mut tick_loop, _) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system_fn("increment", increment);
        tick_loop.add_system(Tracer("trace"));
        tick_loop.run_ticks(5).unwrap();

        let stats = tick_loop.system_stats("increment").unwrap();
        assert_eq!(stats.count, 5);
        assert!(stats.total >= stats.last);
        assert!(tick_loop.system_stats("missing").is_none());

        let last = tick_loop.last_tick_stats().unwrap();
        assert_eq!(last.tick, 5);
        let names: Vec<&str> = last.system_times.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["increment", "trace"]);
        assert!(tick_loop.average_tick_time().is_some());
    }

    #[test]
    fn rolling_window_is_bounded() {
        let (mut tick_loop, _) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.run_ticks(STATS_WINDOW as u64 + 20).unwrap();
        assert_eq!(tick_loop.recent_ticks().count(), STATS_WINDOW);
        assert_eq!(tick_loop.recent_ticks().next().unwrap().tick, 21);
    }

    #[test]
    fn mean_survives_counts_beyond_u32() {
        let stats = SystemStats {
            count: u64::from(u32::MAX) + 2,
            total: Duration::from_nanos(3 * (u64::from(u32::MAX) + 2)),
            last: Duration::from_nanos(3),
        };
        assert_eq!(stats.mean(), Duration::from_nanos(3));
        assert_eq!(SystemStats::default().mean(), Duration::ZERO);
    }

    // -- 6. Cancellation ----------------------------------------------------

    #[test]
    fn run_ticks_until_stops_between_ticks() {
        let (mut tick_loop, _) = build_tick_loop(FailurePolicy::Halt);
        tick_loop.add_system_fn("increment", increment);
        let ran = tick_loop
            .run_ticks_until(50, |tl| tl.tick_count() >= 7)
            .unwrap();
        assert_eq!(ran, 7);
        assert_eq!(tick_loop.tick_count(), 7);
    }
}
