//! Counter-based deterministic random streams.
//!
//! The [`RngManager`] holds a single root seed. Every stream is derived, not
//! stored: a *system stream* is a pure function of `(root seed, system name,
//! tick)`, and an *entity stream* of `(root seed, system name, entity, tick)`.
//! Derivation uses integer-only splitmix64 folding, so the same inputs give the
//! same generator on every platform, and seeds a [`Pcg64Mcg`] generator.
//!
//! A system's identity is its name, hashed with BLAKE3 down to 64 bits. Adding
//! or reordering systems therefore never changes another system's draws.
//!
//! ```
//! use rand::Rng;
//! use tessera_engine::rng::RngManager;
//!
//! let mut a = RngManager::new(7);
//! let mut b = RngManager::new(7);
//! a.advance();
//! b.advance();
//! let x: u64 = a.system_stream("population").gen();
//! let y: u64 = b.system_stream("population").gen();
//! assert_eq!(x, y);
//! ```

use std::collections::BTreeMap;

use rand::RngCore;
pub use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use tessera_ecs::entity::EntityId;

/// Stream name reserved for world population at setup time.
pub const SETUP_STREAM: &str = "setup";

/// Generator handed out for a single `(system, entity, tick)`.
pub type EntityRng = Pcg64Mcg;

// ---------------------------------------------------------------------------
// Mixing
// ---------------------------------------------------------------------------

const SYSTEM_DOMAIN: u64 = 0x5359_5354_454D_0001;
const ENTITY_DOMAIN: u64 = 0x454E_5449_5459_0002;

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn fold_mix(state: u64, value: u64, tweak: u64) -> u64 {
    splitmix64(state ^ value.wrapping_mul(tweak))
}

fn derive_seed(root: u64, domain: u64, key: u64, subject: u64, tick: u64) -> u64 {
    let mut state = splitmix64(root ^ domain);
    state = fold_mix(state, key, 0x9E37_79B9);
    state = fold_mix(state, subject, 0xC2B2_AE35);
    state = fold_mix(state, tick, 0x1656_67B1);
    splitmix64(state ^ 0xD1B5_4A32_4F3A_9E55)
}

fn generator(seed: u64) -> Pcg64Mcg {
    let state = (seed as u128) << 64 | splitmix64(seed) as u128;
    Pcg64Mcg::new(state)
}

/// 64-bit stream key for a system name.
pub fn stream_key(name: &str) -> u64 {
    let hash = blake3::hash(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

// ---------------------------------------------------------------------------
// SystemRng
// ---------------------------------------------------------------------------

/// The random stream of one system for one tick.
///
/// Implements [`RngCore`], so the whole `rand::Rng` surface is available.
#[derive(Debug, Clone)]
pub struct SystemRng {
    root_seed: u64,
    key: u64,
    tick: u64,
    inner: Pcg64Mcg,
}

impl SystemRng {
    fn derive(root_seed: u64, key: u64, tick: u64) -> Self {
        Self {
            root_seed,
            key,
            tick,
            inner: generator(derive_seed(root_seed, SYSTEM_DOMAIN, key, 0, tick)),
        }
    }

    /// Independent stream for `entity` under this system and tick.
    ///
    /// Does not advance `self`, so the result does not depend on how many
    /// draws the system has already made or in which order entities are
    /// visited.
    pub fn for_entity(&self, entity: EntityId) -> EntityRng {
        generator(derive_seed(
            self.root_seed,
            ENTITY_DOMAIN,
            self.key,
            entity.to_raw(),
            self.tick,
        ))
    }

    /// Tick this stream belongs to.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Stream key of the owning system.
    pub fn key(&self) -> u64 {
        self.key
    }
}

impl RngCore for SystemRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

// ---------------------------------------------------------------------------
// RngManager
// ---------------------------------------------------------------------------

/// Persisted RNG state: everything needed to re-derive every stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub root_seed: u64,
    pub tick: u64,
}

/// Owner of the root seed and the current tick.
///
/// System streams handed out during a tick are cached so a system that asks
/// twice continues where it left off; the cache is dropped on every advance.
#[derive(Debug, Clone)]
pub struct RngManager {
    root_seed: u64,
    tick: u64,
    cache: BTreeMap<String, SystemRng>,
}

impl RngManager {
    /// Create a manager at tick 0.
    pub fn new(root_seed: u64) -> Self {
        Self {
            root_seed,
            tick: 0,
            cache: BTreeMap::new(),
        }
    }

    /// Rebuild a manager from persisted state.
    pub fn from_state(state: RngState) -> Self {
        Self {
            root_seed: state.root_seed,
            tick: state.tick,
            cache: BTreeMap::new(),
        }
    }

    pub fn root_seed(&self) -> u64 {
        self.root_seed
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn state(&self) -> RngState {
        RngState {
            root_seed: self.root_seed,
            tick: self.tick,
        }
    }

    /// Move to the next tick, invalidating cached streams.
    pub fn advance(&mut self) -> u64 {
        self.advance_to(self.tick + 1);
        self.tick
    }

    /// Move to `tick`, invalidating cached streams.
    pub fn advance_to(&mut self, tick: u64) {
        self.tick = tick;
        self.cache.clear();
    }

    /// The cached stream of `system` for the current tick.
    pub fn system_stream(&mut self, system: &str) -> &mut SystemRng {
        let (root, tick) = (self.root_seed, self.tick);
        self.cache
            .entry(system.to_owned())
            .or_insert_with(|| SystemRng::derive(root, stream_key(system), tick))
    }

    /// A fresh copy of `system`'s stream at `tick`, from its first draw.
    /// Works for any tick, past or future, without touching the cache.
    pub fn derive_stream(&self, system: &str, tick: u64) -> SystemRng {
        SystemRng::derive(self.root_seed, stream_key(system), tick)
    }

    /// The stream for `(system, entity)` at the current tick.
    pub fn entity_stream(&self, system: &str, entity: EntityId) -> EntityRng {
        self.derive_stream(system, self.tick).for_entity(entity)
    }

    /// Number of streams cached for the current tick.
    pub fn cached_streams(&self) -> usize {
        self.cache.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn draws(rng: &mut impl RngCore, n: usize) -> Vec<u64> {
        (0..n).map(|_| rng.next_u64()).collect()
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = RngManager::new(42);
        let mut b = RngManager::new(42);
        assert_eq!(
            draws(a.system_stream("environment"), 16),
            draws(b.system_stream("environment"), 16)
        );
    }

    #[test]
    fn rederiving_yields_identical_sequence() {
        let manager = RngManager::new(9);
        let mut first = manager.derive_stream("population", 12);
        let mut second = manager.derive_stream("population", 12);
        assert_eq!(draws(&mut first, 64), draws(&mut second, 64));
    }

    #[test]
    fn cached_stream_continues_within_tick() {
        let mut manager = RngManager::new(1);
        let first = manager.system_stream("environment").next_u64();
        let second = manager.system_stream("environment").next_u64();
        let mut fresh = manager.derive_stream("environment", 0);
        assert_eq!(fresh.next_u64(), first);
        assert_eq!(fresh.next_u64(), second);
    }

    #[test]
    fn advance_clears_cache_and_changes_stream() {
        let mut manager = RngManager::new(1);
        let before = manager.system_stream("environment").next_u64();
        assert_eq!(manager.cached_streams(), 1);
        assert_eq!(manager.advance(), 1);
        assert_eq!(manager.cached_streams(), 0);
        let after = manager.system_stream("environment").next_u64();
        assert_ne!(before, after);
        // Prior ticks remain derivable on demand.
        assert_eq!(manager.derive_stream("environment", 0).next_u64(), before);
    }

    #[test]
    fn root_seed_changes_every_stream() {
        let a = RngManager::new(1).derive_stream("environment", 3).next_u64();
        let b = RngManager::new(2).derive_stream("environment", 3).next_u64();
        assert_ne!(a, b);
    }

    #[test]
    fn entity_streams_are_reproducible_and_distinct() {
        let manager = RngManager::new(5);
        let e1 = EntityId::new(1, 0);
        let e2 = EntityId::new(2, 0);
        let e1_reused = EntityId::new(1, 1);

        let base = draws(&mut manager.entity_stream("population", e1), 8);
        assert_eq!(base, draws(&mut manager.entity_stream("population", e1), 8));
        assert_ne!(base, draws(&mut manager.entity_stream("population", e2), 8));
        assert_ne!(base, draws(&mut manager.entity_stream("population", e1_reused), 8));
        assert_ne!(base, draws(&mut manager.entity_stream("environment", e1), 8));
    }

    #[test]
    fn entity_stream_ignores_system_draw_position() {
        let mut manager = RngManager::new(5);
        let e = EntityId::new(3, 0);
        let untouched = manager.system_stream("population").for_entity(e).next_u64();
        manager.system_stream("population").next_u64();
        let after_draw = manager.system_stream("population").for_entity(e).next_u64();
        assert_eq!(untouched, after_draw);
    }

    #[test]
    fn entity_zero_differs_from_system_stream() {
        let manager = RngManager::new(0);
        let system = manager.derive_stream("population", 0).next_u64();
        let entity = manager
            .entity_stream("population", EntityId::from_raw(0))
            .next_u64();
        assert_ne!(system, entity);
    }

    #[test]
    fn state_roundtrip_restores_streams() {
        let mut manager = RngManager::new(77);
        manager.advance_to(30);
        let expected = manager.derive_stream("environment", 30).next_u64();
        let mut restored = RngManager::from_state(manager.state());
        assert_eq!(restored.tick(), 30);
        assert_eq!(restored.system_stream("environment").next_u64(), expected);
    }

    #[test]
    fn stream_keys_are_stable_and_distinct() {
        assert_eq!(stream_key("environment"), stream_key("environment"));
        assert_ne!(stream_key("environment"), stream_key("population"));
    }

    #[test]
    fn gen_range_works_through_rng_trait() {
        let mut manager = RngManager::new(3);
        let stream = manager.system_stream("environment");
        for _ in 0..1000 {
            let v: f64 = stream.gen_range(0.95..1.05);
            assert!((0.95..1.05).contains(&v));
        }
    }
}
