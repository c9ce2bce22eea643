//! Reference tile pipeline: world setup plus the environment, population and
//! bookkeeping systems.
//!
//! Per-tile randomness always comes from the entity stream of the running
//! system, so a tile's draws do not depend on how many other tiles exist or
//! in which order they are visited. Draws that are naturally sequential over
//! the dense store order use the system stream.

use std::f64::consts::TAU;

use rand::Rng;
use tessera_ecs::entity::EntityId;
use tessera_ecs::world::World;
use tessera_ecs::EcsError;

use crate::components::{Environment, LandCover, LandUse, Location, Population, ResourceStock};
use crate::config::SimConfig;
use crate::rng::{RngManager, SystemRng, SETUP_STREAM};
use crate::spatial::{SpatialGrid, TilePos};
use crate::tick::{System, SystemContext, SystemError};

/// Extra deaths per day, as a fraction of citizens, at total food shortage.
const STARVATION_DEATH_RATE: f64 = 0.05;

/// Days in the seasonal cycle.
const YEAR_DAYS: f64 = 365.0;

// ---------------------------------------------------------------------------
// World setup
// ---------------------------------------------------------------------------

fn terrain(grid: &SpatialGrid, pos: TilePos, rng: &mut impl Rng) -> (Environment, LandCover) {
    let fx = (pos.x as f64 + 0.5) / grid.width() as f64 - 0.5;
    let fy = (pos.y as f64 + 0.5) / grid.height() as f64 - 0.5;
    // 0 at the centre, 1 at the edge midpoints.
    let radius = 2.0 * (fx * fx + fy * fy).sqrt();
    let coast: f64 = rng.gen_range(0.8..0.95);

    let temp_idx = (1.0 - 4.0 * fy.abs() + rng.gen_range(-0.1..0.1_f64)).clamp(-1.0, 1.0);
    let precip_idx: f64 = rng.gen_range(0.2..1.0);

    if radius > coast {
        let env = Environment {
            temp_idx,
            precip_idx,
            soil_fertility: 0.0,
        };
        let cover = LandCover {
            land_use: LandUse::Water,
            fraction_urban: 0.0,
            fraction_forest: 0.0,
            fraction_cropland: 0.0,
        };
        return (env, cover);
    }

    let soil_fertility = (precip_idx * rng.gen_range(0.5..1.0_f64) * (1.0 - 0.5 * radius)).clamp(0.05, 1.0);
    let roll: f64 = rng.gen();
    let land_use = if precip_idx < 0.3 {
        LandUse::Desert
    } else if roll < 0.05 {
        LandUse::Urban
    } else if roll < 0.35 {
        LandUse::Forest
    } else if roll < 0.75 {
        LandUse::Cropland
    } else {
        LandUse::Grassland
    };
    let fraction_urban = if land_use == LandUse::Urban {
        rng.gen_range(0.5..0.9_f64)
    } else {
        rng.gen_range(0.0..0.05_f64)
    };
    let fraction_forest = (1.0 - fraction_urban) * rng.gen_range(0.0..1.0_f64);
    let fraction_cropland = (1.0 - fraction_urban - fraction_forest) * rng.gen_range(0.0..1.0_f64);

    (
        Environment {
            temp_idx,
            precip_idx,
            soil_fertility,
        },
        LandCover {
            land_use,
            fraction_urban,
            fraction_forest,
            fraction_cropland,
        },
    )
}

/// Spawn one entity per tile, in tile-id order, with generated terrain,
/// resources and an initial population.
///
/// All draws come from per-tile entity streams of the reserved
/// [`SETUP_STREAM`] at the manager's current tick. `persons` is split over
/// habitable tiles in proportion to soil fertility; the integer remainder
/// goes one person per tile in tile-id order, so the total is exact.
///
/// Returns the tile entities indexed by tile id.
pub fn populate_world(
    world: &mut World,
    grid: &SpatialGrid,
    config: &SimConfig,
    rng: &RngManager,
) -> Result<Vec<EntityId>, EcsError> {
    let res = &config.resources;
    let mut tiles = Vec::with_capacity(grid.tile_count() as usize);
    let mut weights = Vec::with_capacity(grid.tile_count() as usize);

    for id in grid.ids() {
        let Ok(pos) = grid.pos_of(id) else { continue };
        let entity = world.spawn();
        let mut tile_rng = rng.entity_stream(SETUP_STREAM, entity);

        let (env, cover) = terrain(grid, pos, &mut tile_rng);
        let habitable = cover.land_use.is_habitable();
        let stock = ResourceStock {
            mineral_tonnage: res.max_mineral_tonnage * tile_rng.gen_range(0.0..1.0_f64).powi(3),
            ore_grade: tile_rng.gen_range(0.001..0.05_f64),
            water_available: res.max_water * env.precip_idx,
            biomass: res.max_biomass * env.soil_fertility * tile_rng.gen_range(0.5..1.0_f64),
        };
        weights.push(if habitable {
            (env.soil_fertility * 1_000_000.0).round().max(1.0) as u128
        } else {
            0
        });

        world.insert_component(entity, Location { tile_id: id })?;
        world.insert_component(entity, env)?;
        world.insert_component(entity, cover)?;
        world.insert_component(entity, stock)?;
        world.insert_component(
            entity,
            Population {
                citizens: 0,
                starving: false,
            },
        )?;
        tiles.push(entity);
    }

    let total_weight: u128 = weights.iter().sum();
    if total_weight == 0 {
        if config.population.persons > 0 {
            tracing::warn!(persons = config.population.persons, "no habitable tiles; population left unplaced");
        }
        return Ok(tiles);
    }
    let persons = config.population.persons as u128;
    let shares: Vec<u64> = weights
        .iter()
        .map(|&w| (persons * w / total_weight) as u64)
        .collect();
    let mut remainder = config.population.persons - shares.iter().sum::<u64>();
    for ((&entity, &weight), &share) in tiles.iter().zip(&weights).zip(&shares) {
        let extra = u64::from(weight > 0 && remainder > 0);
        remainder -= extra;
        if let Some(pop) = world.get_component_mut::<Population>(entity) {
            pop.citizens = share + extra;
        }
    }
    tracing::info!(tiles = tiles.len(), persons = config.population.persons, "world populated");
    Ok(tiles)
}

fn missing_store(component: &str) -> SystemError {
    SystemError::failed(format!("component store '{component}' is not registered"))
}

// ---------------------------------------------------------------------------
// EnvironmentSystem
// ---------------------------------------------------------------------------

/// Seasonal climate drift and biomass regrowth.
#[derive(Debug, Clone)]
pub struct EnvironmentSystem {
    pub max_biomass: f64,
    pub regrowth_per_day: f64,
}

impl EnvironmentSystem {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            max_biomass: config.resources.max_biomass,
            regrowth_per_day: config.resources.biomass_regrowth_per_day,
        }
    }
}

impl System for EnvironmentSystem {
    fn name(&self) -> &str {
        "environment"
    }

    fn run(
        &self,
        ctx: &SystemContext<'_>,
        world: &mut World,
        rng: &mut SystemRng,
    ) -> Result<(), SystemError> {
        let season = (TAU * ctx.days_elapsed / YEAR_DAYS).cos();
        let drift = 0.002 * season * ctx.dt_days;

        let envs = world
            .store_mut::<Environment>()
            .ok_or_else(|| missing_store("environment"))?;
        for (entity, env) in envs.iter_mut() {
            let mut tile_rng = rng.for_entity(entity);
            let temp_noise: f64 = tile_rng.gen_range(-0.01..0.01);
            let precip_noise: f64 = tile_rng.gen_range(-0.01..0.01);
            env.temp_idx = (env.temp_idx + drift + temp_noise).clamp(-1.0, 1.0);
            env.precip_idx = (env.precip_idx + precip_noise).clamp(0.0, 1.0);
        }

        let (stocks, envs) = world
            .store_pair_mut::<ResourceStock, Environment>()
            .ok_or_else(|| missing_store("resource_stock"))?;
        for (entity, stock) in stocks.iter_mut() {
            let fertility = envs.get(entity).map_or(0.0, |e| e.soil_fertility);
            let fluctuation: f64 = rng.gen_range(0.95..1.05);
            let gap = (self.max_biomass - stock.biomass).max(0.0);
            stock.biomass += gap * self.regrowth_per_day * fertility * ctx.dt_days * fluctuation;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PopulationSystem
// ---------------------------------------------------------------------------

/// Food consumption, starvation, births and deaths.
#[derive(Debug, Clone)]
pub struct PopulationSystem {
    pub annual_birth_rate: f64,
    pub annual_death_rate: f64,
    pub food_per_person_per_day: f64,
}

impl PopulationSystem {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            annual_birth_rate: config.population.annual_birth_rate,
            annual_death_rate: config.population.annual_death_rate,
            food_per_person_per_day: config.population.food_per_person_per_day,
        }
    }
}

/// Expected value plus a bounded term of up to one standard deviation,
/// rounded and floored at zero.
fn stochastic_count(expected: f64, rng: &mut impl Rng) -> u64 {
    if expected <= 0.0 {
        return 0;
    }
    let noise: f64 = rng.gen_range(-1.0..1.0);
    (expected + noise * expected.sqrt()).round().max(0.0) as u64
}

impl System for PopulationSystem {
    fn name(&self) -> &str {
        "population"
    }

    fn run(
        &self,
        ctx: &SystemContext<'_>,
        world: &mut World,
        rng: &mut SystemRng,
    ) -> Result<(), SystemError> {
        let dt_years = ctx.dt_days / YEAR_DAYS;
        let mut eaten: Vec<(EntityId, f64)> = Vec::new();

        let (pops, stocks) = world
            .store_pair_mut::<Population, ResourceStock>()
            .ok_or_else(|| missing_store("population"))?;
        for (entity, pop) in pops.iter_mut() {
            if pop.citizens == 0 {
                pop.starving = false;
                continue;
            }
            let citizens = pop.citizens as f64;
            let need = citizens * self.food_per_person_per_day * ctx.dt_days;
            let available = stocks.get(entity).map_or(0.0, |s| s.biomass.max(0.0));
            let consumed = need.min(available);
            let shortage = if need > 0.0 { 1.0 - consumed / need } else { 0.0 };
            eaten.push((entity, consumed));

            let mut tile_rng = rng.for_entity(entity);
            let births = stochastic_count(citizens * self.annual_birth_rate * dt_years, &mut tile_rng);
            let deaths = stochastic_count(citizens * self.annual_death_rate * dt_years, &mut tile_rng);
            let starved = (citizens * shortage * STARVATION_DEATH_RATE * ctx.dt_days).ceil() as u64;

            pop.starving = starved > 0;
            pop.citizens = (pop.citizens + births).saturating_sub(deaths + starved);
        }

        for (entity, consumed) in eaten {
            if let Some(stock) = world.get_component_mut::<ResourceStock>(entity) {
                stock.biomass -= consumed;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BookkeepingSystem
// ---------------------------------------------------------------------------

/// Rejects non-finite state and clamps stocks at zero.
#[derive(Debug, Clone, Default)]
pub struct BookkeepingSystem;

impl System for BookkeepingSystem {
    fn name(&self) -> &str {
        "bookkeeping"
    }

    fn run(
        &self,
        _ctx: &SystemContext<'_>,
        world: &mut World,
        _rng: &mut SystemRng,
    ) -> Result<(), SystemError> {
        // Check before clamping: `f64::max` would turn a NaN into 0.0.
        if let Some(envs) = world.store::<Environment>() {
            for (entity, env) in envs.iter() {
                if !(env.temp_idx.is_finite()
                    && env.precip_idx.is_finite()
                    && env.soil_fertility.is_finite())
                {
                    return Err(SystemError::NonFinite {
                        component: "environment",
                        entity,
                    });
                }
            }
        }
        let stocks = world
            .store_mut::<ResourceStock>()
            .ok_or_else(|| missing_store("resource_stock"))?;
        for (entity, stock) in stocks.iter() {
            if !stock.is_finite() {
                return Err(SystemError::NonFinite {
                    component: "resource_stock",
                    entity,
                });
            }
        }
        for (_, stock) in stocks.iter_mut() {
            stock.clamp_non_negative();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The reference pipeline, in execution order: environment, population,
/// bookkeeping.
pub fn standard_pipeline(config: &SimConfig) -> Vec<Box<dyn System>> {
    vec![
        Box::new(EnvironmentSystem::from_config(config)),
        Box::new(PopulationSystem::from_config(config)),
        Box::new(BookkeepingSystem),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
