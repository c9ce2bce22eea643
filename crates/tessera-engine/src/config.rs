//! Scenario configuration.
//!
//! [`SimConfig`] is read once at startup (YAML via `serde_yaml`) and never
//! mutated by the kernel. Every section has defaults matching the
//! `tiny_island` scenario, so a file only needs the fields it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::tick::FailurePolicy;

/// Errors loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Checkpointing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotConfig {
    /// Ticks between checkpoints; `0` disables checkpointing.
    pub interval: u64,
    /// Root directory of the on-disk snapshot store.
    pub output_dir: PathBuf,
    /// Retries of a transient write failure before giving up.
    pub max_retries: u32,
    /// Fixed pause between retries.
    pub retry_backoff_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: 30,
            output_dir: PathBuf::from("output"),
            max_retries: 3,
            retry_backoff_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpatialConfig {
    pub width: u32,
    pub height: u32,
    /// Wrap neighbors and distances around both axes.
    pub toroidal: bool,
    /// Edge length, in tiles, of a telemetry region.
    pub region_size: u32,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 64,
            toroidal: false,
            region_size: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PopulationConfig {
    /// Initial head count, spread over habitable tiles.
    pub persons: u64,
    pub annual_birth_rate: f64,
    pub annual_death_rate: f64,
    /// Biomass one person eats per day.
    pub food_per_person_per_day: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            persons: 50_000,
            annual_birth_rate: 0.02,
            annual_death_rate: 0.015,
            food_per_person_per_day: 0.002,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceConfig {
    pub max_biomass: f64,
    pub max_water: f64,
    pub max_mineral_tonnage: f64,
    /// Fraction of the gap to `max_biomass` regrown per day at full fertility.
    pub biomass_regrowth_per_day: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_biomass: 1_000.0,
            max_water: 10_000.0,
            max_mineral_tonnage: 1_000_000.0,
            biomass_regrowth_per_day: 0.01,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Emit a frame after every tick rather than only at checkpoints.
    pub every_tick: bool,
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Top-level scenario configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Scenario name; scopes snapshot keys.
    pub name: String,
    /// Root RNG seed.
    pub seed: u64,
    pub tick_count: u64,
    /// Logical days per tick.
    pub dt_days: f64,
    pub failure_policy: FailurePolicy,
    pub snapshot: SnapshotConfig,
    pub spatial: SpatialConfig,
    pub population: PopulationConfig,
    pub resources: ResourceConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::tiny_island()
    }
}

impl SimConfig {
    /// The default scenario: a 128x64 island, seed 7, checkpoint every 30 ticks.
    pub fn tiny_island() -> Self {
        Self {
            name: "tiny_island".to_owned(),
            seed: 7,
            tick_count: 90,
            dt_days: 1.0,
            failure_policy: FailurePolicy::Halt,
            snapshot: SnapshotConfig::default(),
            spatial: SpatialConfig::default(),
            population: PopulationConfig::default(),
            resources: ResourceConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write as YAML, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io = |source| ConfigError::Io {
            path: path.to_owned(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(path, self.to_yaml_string()?).map_err(io)
    }

    /// Check every field the kernel relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.name.is_empty() {
            return Err(invalid("name", "must not be empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid(
                "name",
                format!("'{}' may only contain ASCII letters, digits, '_' and '-'", self.name),
            ));
        }
        if !(self.dt_days.is_finite() && self.dt_days > 0.0) {
            return Err(invalid(
                "dt_days",
                format!("must be positive and finite, got {}", self.dt_days),
            ));
        }

        let spatial = &self.spatial;
        if spatial.width == 0 || spatial.height == 0 {
            return Err(invalid(
                "spatial",
                format!("width and height must be positive, got {}x{}", spatial.width, spatial.height),
            ));
        }
        if spatial.width.checked_mul(spatial.height).is_none() {
            return Err(invalid("spatial", "width * height overflows the tile id space"));
        }
        if spatial.region_size == 0 {
            return Err(invalid("spatial.region_size", "must be positive"));
        }

        let pop = &self.population;
        for (field, rate) in [
            ("population.annual_birth_rate", pop.annual_birth_rate),
            ("population.annual_death_rate", pop.annual_death_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(invalid(field, format!("must be within [0, 1], got {rate}")));
            }
        }
        if !(pop.food_per_person_per_day.is_finite() && pop.food_per_person_per_day >= 0.0) {
            return Err(invalid(
                "population.food_per_person_per_day",
                "must be non-negative and finite",
            ));
        }

        let res = &self.resources;
        for (field, value) in [
            ("resources.max_biomass", res.max_biomass),
            ("resources.max_water", res.max_water),
            ("resources.max_mineral_tonnage", res.max_mineral_tonnage),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(field, format!("must be non-negative and finite, got {value}")));
            }
        }
        if !(0.0..=1.0).contains(&res.biomass_regrowth_per_day) {
            return Err(invalid(
                "resources.biomass_regrowth_per_day",
                format!("must be within [0, 1], got {}", res.biomass_regrowth_per_day),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
