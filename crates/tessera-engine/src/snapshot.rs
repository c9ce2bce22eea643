//! Checkpointing with BLAKE3 integrity hashes.
//!
//! A [`Snapshot`] is an immutable, versioned record of everything needed to
//! resume ticking: the ECS world (allocator and every component table in dense
//! order), the tick counter and the RNG root state. Its `state_hash` is a
//! BLAKE3 hex digest over the canonical JSON encoding of that state, so two
//! runs that reach the same state produce the same hash. The wall-clock
//! timestamp is recorded but not hashed.
//!
//! The [`SnapshotManager`] decides when a checkpoint is due, encodes it, and
//! writes it to a [`SnapshotStore`] with bounded retries on transient I/O
//! failures.
//!
//! # Checkpoint policy
//!
//! With interval `n > 0`, checkpoints are written after tick `t` whenever
//! `t > 0` and `t % n == 0`. Tick 0 is never checkpointed automatically, and
//! the final tick only when it falls on the interval. `n == 0` disables
//! automatic checkpoints entirely; [`TickLoop::checkpoint_now`] still works.
//!
//! # What Is NOT Serialized
//!
//! - **Systems** -- the caller re-registers the pipeline before resuming.
//! - **Statistics** -- timing is transient.
//! - **Grid dimensions** -- they come from configuration.

use std::fmt;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tessera_ecs::snapshot::WorldSnapshot;
use tessera_ecs::world::World;
use tessera_ecs::EcsError;

use crate::rng::{RngManager, RngState};
use crate::store::SnapshotStore;
use crate::tick::{RunMode, TickLoop};
use crate::EngineError;

/// Current on-disk format.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A transient failure persisted through every retry.
    #[error("writing snapshot {key} failed after {attempts} attempts: {source}")]
    Transient {
        key: SnapshotKey,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// A non-retryable I/O failure.
    #[error("snapshot I/O failed for {key}: {source}")]
    Io {
        key: SnapshotKey,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode snapshot {key}: {source}")]
    Decode {
        key: SnapshotKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot {key} has format version {found}, expected {expected}")]
    UnsupportedVersion {
        key: SnapshotKey,
        found: u32,
        expected: u32,
    },

    #[error("snapshot {key} failed its integrity check: stored hash {expected}, computed {actual}")]
    HashMismatch {
        key: SnapshotKey,
        expected: String,
        actual: String,
    },

    #[error("no snapshot stored under {key}")]
    NotFound { key: SnapshotKey },

    /// The stored record describes a different scenario or tick than its key.
    #[error("snapshot stored under {key} records {found}")]
    KeyMismatch { key: SnapshotKey, found: SnapshotKey },

    #[error("failed to capture world state: {0}")]
    Capture(#[source] EcsError),

    #[error("failed to restore world from snapshot: {0}")]
    Restore(#[from] EcsError),
}

// ---------------------------------------------------------------------------
// SnapshotKey
// ---------------------------------------------------------------------------

/// Scenario-scoped, tick-numbered snapshot address.
///
/// Renders as `{scenario}/tick_{tick:08}.json`. Keys order by scenario, then
/// tick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub scenario: String,
    pub tick: u64,
}

impl SnapshotKey {
    pub fn new(scenario: impl Into<String>, tick: u64) -> Self {
        Self {
            scenario: scenario.into(),
            tick,
        }
    }

    /// `tick_{tick:08}.json`
    pub fn file_name(&self) -> String {
        format!("tick_{:08}.json", self.tick)
    }

    /// Parse a file name produced by [`file_name`](Self::file_name).
    pub fn from_file_name(scenario: &str, name: &str) -> Option<Self> {
        let digits = name.strip_prefix("tick_")?.strip_suffix(".json")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self::new(scenario, digits.parse().ok()?))
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scenario, self.file_name())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A versioned point-in-time record of the simulation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub scenario: String,
    pub tick: u64,
    /// Milliseconds since the Unix epoch at capture. Not hashed.
    pub timestamp: u64,
    pub entity_count: u64,
    pub mode: RunMode,
    /// BLAKE3 hex digest (64 lowercase hex chars) of the canonical state.
    pub state_hash: String,
    pub world: WorldSnapshot,
    pub rng: RngState,
}

#[derive(Serialize)]
struct HashableState<'a> {
    format_version: u32,
    scenario: &'a str,
    tick: u64,
    entity_count: u64,
    mode: RunMode,
    world: &'a WorldSnapshot,
    rng: &'a RngState,
}

impl Snapshot {
    /// Capture `world` and `rng` at `tick`.
    pub fn capture(
        scenario: &str,
        tick: u64,
        world: &World,
        rng: RngState,
        mode: RunMode,
    ) -> Result<Self, SnapshotError> {
        let world = world.capture_snapshot().map_err(SnapshotError::Capture)?;
        let mut snapshot = Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            scenario: scenario.to_owned(),
            tick,
            timestamp: unix_millis(),
            entity_count: world.entity_count() as u64,
            mode,
            state_hash: String::new(),
            world,
            rng,
        };
        snapshot.state_hash = snapshot.compute_hash()?;
        Ok(snapshot)
    }

    /// Canonical JSON of everything but the timestamp and the hash itself.
    ///
    /// Two runs that reach the same state produce identical bytes here.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        let hashable = HashableState {
            format_version: self.format_version,
            scenario: &self.scenario,
            tick: self.tick,
            entity_count: self.entity_count,
            mode: self.mode,
            world: &self.world,
            rng: &self.rng,
        };
        serde_json::to_vec(&hashable).map_err(SnapshotError::Encode)
    }

    /// Recompute the BLAKE3 hex digest of the canonical state.
    pub fn compute_hash(&self) -> Result<String, SnapshotError> {
        Ok(blake3::hash(&self.canonical_bytes()?).to_hex().to_string())
    }

    /// The key this snapshot is stored under.
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.scenario.clone(), self.tick)
    }

    /// Encode for storage (pretty JSON).
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec_pretty(self).map_err(SnapshotError::Encode)
    }

    /// Decode stored bytes and verify that they belong to `key` and carry a
    /// supported version and a matching hash before returning.
    pub fn decode(key: &SnapshotKey, bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self =
            serde_json::from_slice(bytes).map_err(|source| SnapshotError::Decode {
                key: key.clone(),
                source,
            })?;
        snapshot.verify(key)?;
        Ok(snapshot)
    }

    fn verify(&self, key: &SnapshotKey) -> Result<(), SnapshotError> {
        let found = self.key();
        if found != *key {
            return Err(SnapshotError::KeyMismatch {
                key: key.clone(),
                found,
            });
        }
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                key: key.clone(),
                found: self.format_version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }
        let actual = self.compute_hash()?;
        if actual != self.state_hash {
            return Err(SnapshotError::HashMismatch {
                key: key.clone(),
                expected: self.state_hash.clone(),
                actual,
            });
        }
        Ok(())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// SnapshotManager
// ---------------------------------------------------------------------------

/// Retry behaviour for transient write failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Periodic checkpoint writer and loader.
pub struct SnapshotManager {
    scenario: String,
    interval: u64,
    retry: RetryPolicy,
    store: Box<dyn SnapshotStore>,
    written: Vec<SnapshotKey>,
}

impl fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("scenario", &self.scenario)
            .field("interval", &self.interval)
            .field("retry", &self.retry)
            .field("written", &self.written)
            .finish()
    }
}

impl SnapshotManager {
    /// `interval == 0` disables automatic checkpoints.
    pub fn new(
        scenario: impl Into<String>,
        interval: u64,
        store: Box<dyn SnapshotStore>,
    ) -> Self {
        Self {
            scenario: scenario.into(),
            interval,
            retry: RetryPolicy::default(),
            store,
            written: Vec::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Whether an automatic checkpoint is due after `tick`.
    pub fn is_due(&self, tick: u64) -> bool {
        self.interval > 0 && tick > 0 && tick % self.interval == 0
    }

    /// Keys written by this manager, in write order.
    pub fn written(&self) -> &[SnapshotKey] {
        &self.written
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    /// Write a checkpoint if one is due after `tick`.
    pub fn maybe_checkpoint(
        &mut self,
        tick: u64,
        world: &World,
        rng: RngState,
        mode: RunMode,
    ) -> Result<Option<SnapshotKey>, SnapshotError> {
        if !self.is_due(tick) {
            return Ok(None);
        }
        let snapshot = Snapshot::capture(&self.scenario, tick, world, rng, mode)?;
        self.write(&snapshot).map(Some)
    }

    /// Encode and persist `snapshot`, retrying transient failures.
    pub fn write(&mut self, snapshot: &Snapshot) -> Result<SnapshotKey, SnapshotError> {
        let key = snapshot.key();
        let bytes = snapshot.encode()?;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.store.put(&key, &bytes) {
                Ok(()) => break,
                Err(source) if is_transient(&source) && attempt <= self.retry.max_retries => {
                    tracing::warn!(%key, attempt, error = %source, "transient snapshot write failure; retrying");
                    std::thread::sleep(self.retry.backoff);
                }
                Err(source) if is_transient(&source) => {
                    tracing::error!(%key, attempts = attempt, error = %source, "snapshot write retries exhausted");
                    return Err(SnapshotError::Transient {
                        key,
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    tracing::error!(%key, error = %source, "snapshot write failed");
                    return Err(SnapshotError::Io { key, source });
                }
            }
        }
        tracing::info!(%key, hash = %snapshot.state_hash, entities = snapshot.entity_count, "checkpoint written");
        self.written.push(key.clone());
        Ok(key)
    }

    /// Fetch and verify the snapshot stored under `key`.
    pub fn load(&self, key: &SnapshotKey) -> Result<Snapshot, SnapshotError> {
        let bytes = self.store.get(key).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SnapshotError::NotFound { key: key.clone() }
            } else {
                SnapshotError::Io {
                    key: key.clone(),
                    source,
                }
            }
        })?;
        Snapshot::decode(key, &bytes)
    }

    /// Keys stored for this manager's scenario, in tick order.
    pub fn list(&self) -> Result<Vec<SnapshotKey>, SnapshotError> {
        self.store.list(&self.scenario).map_err(|source| SnapshotError::Io {
            key: SnapshotKey::new(self.scenario.clone(), 0),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// TickLoop snapshot/restore methods
// ---------------------------------------------------------------------------

impl TickLoop {
    /// Capture the current state under `scenario`.
    pub fn capture_snapshot(&self, scenario: &str) -> Result<Snapshot, SnapshotError> {
        Snapshot::capture(
            scenario,
            self.tick_counter,
            &self.world,
            self.rng.state(),
            self.mode,
        )
    }

    /// BLAKE3 hex digest of the current state.
    pub fn state_hash(&self) -> Result<String, SnapshotError> {
        Ok(self.capture_snapshot("")?.state_hash)
    }

    /// Write a checkpoint of the current state right now, regardless of the
    /// interval.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoSnapshotManager`] if none is attached, or the write error.
    pub fn checkpoint_now(&mut self) -> Result<SnapshotKey, EngineError> {
        let Some(manager) = self.snapshots.as_mut() else {
            return Err(EngineError::NoSnapshotManager);
        };
        let snapshot = Snapshot::capture(
            &manager.scenario,
            self.tick_counter,
            &self.world,
            self.rng.state(),
            self.mode,
        )?;
        Ok(manager.write(&snapshot)?)
    }

    /// Restore world, tick counter, RNG state and run mode from `snapshot`.
    ///
    /// The hash is re-verified and the world restore is all-or-nothing, so on
    /// error the loop is unchanged. A halted loop becomes usable again.
    /// Registered systems and statistics are retained.
    pub fn restore_from_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        snapshot.verify(&snapshot.key())?;
        self.world.restore_from_snapshot(&snapshot.world)?;
        self.tick_counter = snapshot.tick;
        self.rng = RngManager::from_state(snapshot.rng);
        self.mode = snapshot.mode;
        self.halted = None;
        Ok(())
    }

    /// Load the snapshot under `key` through the attached manager and restore it.
    pub fn resume_from(&mut self, key: &SnapshotKey) -> Result<(), EngineError> {
        let Some(manager) = self.snapshots.as_ref() else {
            return Err(EngineError::NoSnapshotManager);
        };
        let snapshot = manager.load(key)?;
        self.restore_from_snapshot(&snapshot)?;
        tracing::info!(%key, tick = snapshot.tick, "resumed from snapshot");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
