//! Tile components used by the reference pipeline.
//!
//! Every tile is an entity carrying all of these; they are plain data and
//! reference nothing but their own tile id.

use serde::{Deserialize, Serialize};
use tessera_ecs::world::World;

use crate::spatial::TileId;

/// Links an entity to its tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub tile_id: TileId,
}

/// Climate and soil indices for a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Temperature index, roughly -1 (polar) to 1 (tropical).
    pub temp_idx: f64,
    /// Precipitation index in `[0, 1]`.
    pub precip_idx: f64,
    /// Soil fertility in `[0, 1]`.
    pub soil_fertility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandUse {
    Water,
    Forest,
    Cropland,
    Urban,
    Grassland,
    Desert,
}

impl LandUse {
    /// Whether people can live on this tile.
    pub fn is_habitable(self) -> bool {
        !matches!(self, LandUse::Water)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandCover {
    pub land_use: LandUse,
    pub fraction_urban: f64,
    pub fraction_forest: f64,
    pub fraction_cropland: f64,
}

/// Resource stocks held by a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStock {
    pub mineral_tonnage: f64,
    pub ore_grade: f64,
    pub water_available: f64,
    pub biomass: f64,
}

impl ResourceStock {
    pub fn clamp_non_negative(&mut self) {
        self.mineral_tonnage = self.mineral_tonnage.max(0.0);
        self.ore_grade = self.ore_grade.max(0.0);
        self.water_available = self.water_available.max(0.0);
        self.biomass = self.biomass.max(0.0);
    }

    pub fn is_finite(&self) -> bool {
        self.mineral_tonnage.is_finite()
            && self.ore_grade.is_finite()
            && self.water_available.is_finite()
            && self.biomass.is_finite()
    }
}

/// People living on a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub citizens: u64,
    /// Set when the last population update could not feed everyone.
    pub starving: bool,
}

/// Register every tile component under its snapshot table name.
pub fn register_all(world: &mut World) {
    world.register_component::<Location>("location");
    world.register_component::<Environment>("environment");
    world.register_component::<LandCover>("land_cover");
    world.register_component::<ResourceStock>("resource_stock");
    world.register_component::<Population>("population");
}
