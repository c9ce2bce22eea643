//! Summary frames for dashboards and logs.
//!
//! A [`TelemetryFrame`] aggregates tile state into `region_size x region_size`
//! regions. Its shape is the stable contract with consumers. Sums follow the
//! dense order of the `location` store and regions are collected in an
//! ordered map, so a frame is as reproducible as the state it summarizes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tessera_ecs::world::World;

use crate::components::{Environment, Location, Population, ResourceStock};
use crate::spatial::SpatialGrid;

/// Aggregates for one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionMetrics {
    /// `r{rx}_{ry}`
    pub region: String,
    pub tiles: u32,
    pub population: u64,
    pub biomass: f64,
    pub water: f64,
    pub mean_fertility: f64,
    pub starving_tiles: u32,
}

/// One summary frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub tick: u64,
    pub days_elapsed: f64,
    pub total_population: u64,
    /// Regions ordered by `(rx, ry)`.
    pub regions: Vec<RegionMetrics>,
    /// Names of regions with at least one starving tile, in region order.
    pub starving_regions: Vec<String>,
}

#[derive(Default)]
struct Accumulator {
    tiles: u32,
    population: u64,
    biomass: f64,
    water: f64,
    fertility: f64,
    starving_tiles: u32,
}

impl TelemetryFrame {
    /// Summarize `world` at `tick`.
    ///
    /// Entities without a [`Location`], or whose tile lies outside `grid`,
    /// are ignored.
    pub fn collect(
        world: &World,
        grid: &SpatialGrid,
        region_size: u32,
        tick: u64,
        days_elapsed: f64,
    ) -> Self {
        let mut regions: BTreeMap<(u32, u32), Accumulator> = BTreeMap::new();

        if let Some(locations) = world.store::<Location>() {
            for (entity, location) in locations.iter() {
                let Ok(region) = grid.region_of(location.tile_id, region_size) else {
                    continue;
                };
                let acc = regions.entry(region).or_default();
                acc.tiles += 1;
                if let Some(pop) = world.get_component::<Population>(entity) {
                    acc.population += pop.citizens;
                    if pop.starving {
                        acc.starving_tiles += 1;
                    }
                }
                if let Some(stock) = world.get_component::<ResourceStock>(entity) {
                    acc.biomass += stock.biomass;
                    acc.water += stock.water_available;
                }
                if let Some(env) = world.get_component::<Environment>(entity) {
                    acc.fertility += env.soil_fertility;
                }
            }
        }

        let mut frame = TelemetryFrame {
            tick,
            days_elapsed,
            ..Default::default()
        };
        for ((rx, ry), acc) in regions {
            let region = format!("r{rx}_{ry}");
            frame.total_population += acc.population;
            if acc.starving_tiles > 0 {
                frame.starving_regions.push(region.clone());
            }
            frame.regions.push(RegionMetrics {
                region,
                tiles: acc.tiles,
                population: acc.population,
                biomass: acc.biomass,
                water: acc.water,
                mean_fertility: acc.fertility / acc.tiles as f64,
                starving_tiles: acc.starving_tiles,
            });
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::register_all;

    fn tile(world: &mut World, tile_id: u32, citizens: u64, starving: bool) {
        world
            .spawn_with((
                Location { tile_id },
                Population { citizens, starving },
                ResourceStock {
                    mineral_tonnage: 0.0,
                    ore_grade: 0.0,
                    water_available: 2.0,
                    biomass: 10.0,
                },
                Environment {
                    temp_idx: 0.0,
                    precip_idx: 0.5,
                    soil_fertility: 0.5,
                },
            ))
            .unwrap();
    }

    #[test]
    fn aggregates_by_region() {
        let grid = SpatialGrid::new(4, 2);
        let mut world = World::new();
        register_all(&mut world);
        // Region size 2 gives regions r0_0 (x 0..2) and r1_0 (x 2..4).
        tile(&mut world, grid.id_of(0, 0).unwrap(), 10, false);
        tile(&mut world, grid.id_of(1, 1).unwrap(), 5, true);
        tile(&mut world, grid.id_of(3, 0).unwrap(), 7, false);

        let frame = TelemetryFrame::collect(&world, &grid, 2, 4, 4.0);
        assert_eq!(frame.tick, 4);
        assert_eq!(frame.total_population, 22);
        assert_eq!(frame.regions.len(), 2);

        let r0 = &frame.regions[0];
        assert_eq!(r0.region, "r0_0");
        assert_eq!(r0.tiles, 2);
        assert_eq!(r0.population, 15);
        assert_eq!(r0.biomass, 20.0);
        assert_eq!(r0.water, 4.0);
        assert_eq!(r0.mean_fertility, 0.5);
        assert_eq!(r0.starving_tiles, 1);

        assert_eq!(frame.regions[1].region, "r1_0");
        assert_eq!(frame.starving_regions, vec!["r0_0".to_owned()]);
    }

    #[test]
    fn empty_world_gives_empty_frame() {
        let grid = SpatialGrid::new(4, 2);
        let frame = TelemetryFrame::collect(&World::new(), &grid, 2, 0, 0.0);
        assert_eq!(frame.total_population, 0);
        assert!(frame.regions.is_empty());
    }

    #[test]
    fn frame_schema_is_stable() {
        let frame = TelemetryFrame {
            tick: 1,
            days_elapsed: 1.0,
            total_population: 3,
            regions: vec![RegionMetrics {
                region: "r0_0".into(),
                ..Default::default()
            }],
            starving_regions: vec![],
        };
        let value = serde_json::to_value(&frame).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["days_elapsed", "regions", "starving_regions", "tick", "total_population"]
        );
        let region_keys: Vec<&str> = value["regions"][0]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(
            region_keys,
            vec!["biomass", "mean_fertility", "population", "region", "starving_tiles", "tiles", "water"]
        );
    }
}
