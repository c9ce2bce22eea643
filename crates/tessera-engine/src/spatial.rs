//! Fixed-size tile index.
//!
//! A [`SpatialGrid`] maps `(x, y)` positions to tile ids (`id = y * width + x`)
//! and answers neighborhood and distance queries. It owns no simulation state:
//! tiles are ordinary entities whose components live in the world's stores.
//!
//! Adjacency is the 8-neighborhood and [`SpatialGrid::distance`] is the
//! Chebyshev metric (`max(|dx|, |dy|)`), so every neighbor is at distance 1.
//! Edges clip by default; a toroidal grid wraps both axes for neighbors and
//! for distance alike.

use serde::{Deserialize, Serialize};

/// Tile identifier, `y * width + x`.
pub type TileId = u32;

/// Errors from spatial queries. Out-of-range input is always reported, never
/// clamped; callers that want clamping use [`SpatialGrid::clamp_to_grid`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpatialError {
    /// A position outside the grid extents.
    #[error("position ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfBounds { x: u32, y: u32, width: u32, height: u32 },

    /// A tile id past the last tile.
    #[error("tile id {id} is outside the grid ({tile_count} tiles)")]
    TileOutOfBounds { id: TileId, tile_count: u32 },
}

/// A grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePos {
    pub x: u32,
    pub y: u32,
}

// ---------------------------------------------------------------------------
// SpatialGrid
// ---------------------------------------------------------------------------

/// Static `width x height` tile space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialGrid {
    width: u32,
    height: u32,
    toroidal: bool,
}

impl SpatialGrid {
    /// A clipped (non-wrapping) grid.
    ///
    /// # Panics
    ///
    /// Panics if either dimension is zero or the tile count overflows `u32`.
    pub fn new(width: u32, height: u32) -> Self {
        assert!(
            width > 0 && height > 0,
            "grid dimensions must be positive, got {width}x{height}"
        );
        assert!(
            width.checked_mul(height).is_some(),
            "grid of {width}x{height} tiles overflows the tile id space"
        );
        Self {
            width,
            height,
            toroidal: false,
        }
    }

    /// Enable or disable wraparound on both axes.
    pub fn with_toroidal(mut self, toroidal: bool) -> Self {
        self.toroidal = toroidal;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_toroidal(&self) -> bool {
        self.toroidal
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> u32 {
        self.width * self.height
    }

    /// Every tile id in ascending order.
    pub fn ids(&self) -> std::ops::Range<TileId> {
        0..self.tile_count()
    }

    /// Tile id of `(x, y)`.
    pub fn id_of(&self, x: u32, y: u32) -> Result<TileId, SpatialError> {
        if x >= self.width || y >= self.height {
            return Err(SpatialError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(y * self.width + x)
    }

    /// Position of tile `id`.
    pub fn pos_of(&self, id: TileId) -> Result<TilePos, SpatialError> {
        self.check(id)?;
        Ok(TilePos {
            x: id % self.width,
            y: id / self.width,
        })
    }

    fn check(&self, id: TileId) -> Result<(), SpatialError> {
        if id >= self.tile_count() {
            return Err(SpatialError::TileOutOfBounds {
                id,
                tile_count: self.tile_count(),
            });
        }
        Ok(())
    }

    /// The up-to-8 tiles adjacent to `id`, row by row from the top-left.
    ///
    /// Clipped grids drop neighbors past an edge. Toroidal grids wrap them;
    /// on grids narrower than 3 tiles a wrapped neighbor can coincide with
    /// another (or with `id` itself) and is listed once, never including `id`.
    pub fn neighbors(&self, id: TileId) -> Result<Vec<TileId>, SpatialError> {
        let pos = self.pos_of(id)?;
        let mut out = Vec::with_capacity(8);
        for dy in [-1i64, 0, 1] {
            for dx in [-1i64, 0, 1] {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let Some(neighbor) = self.offset(pos, dx, dy) else {
                    continue;
                };
                if neighbor != id && !out.contains(&neighbor) {
                    out.push(neighbor);
                }
            }
        }
        Ok(out)
    }

    fn offset(&self, pos: TilePos, dx: i64, dy: i64) -> Option<TileId> {
        let (w, h) = (self.width as i64, self.height as i64);
        let (mut x, mut y) = (pos.x as i64 + dx, pos.y as i64 + dy);
        if self.toroidal {
            x = x.rem_euclid(w);
            y = y.rem_euclid(h);
        } else if x < 0 || y < 0 || x >= w || y >= h {
            return None;
        }
        Some(y as u32 * self.width + x as u32)
    }

    /// Chebyshev distance between two tiles, using the shorter way around
    /// each axis on a toroidal grid.
    pub fn distance(&self, a: TileId, b: TileId) -> Result<u32, SpatialError> {
        let pa = self.pos_of(a)?;
        let pb = self.pos_of(b)?;
        let mut dx = pa.x.abs_diff(pb.x);
        let mut dy = pa.y.abs_diff(pb.y);
        if self.toroidal {
            dx = dx.min(self.width - dx);
            dy = dy.min(self.height - dy);
        }
        Ok(dx.max(dy))
    }

    /// The tile nearest to a possibly out-of-range position. For callers that
    /// explicitly want clamping instead of [`SpatialError::OutOfBounds`].
    pub fn clamp_to_grid(&self, x: i64, y: i64) -> TileId {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        y * self.width + x
    }

    /// Region coordinates of `id` when the grid is cut into
    /// `region_size x region_size` blocks (the last row/column may be short).
    pub fn region_of(&self, id: TileId, region_size: u32) -> Result<(u32, u32), SpatialError> {
        let pos = self.pos_of(id)?;
        let size = region_size.max(1);
        Ok((pos.x / size, pos.y / size))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_layout_is_row_major() {
        let grid = SpatialGrid::new(10, 5);
        assert_eq!(grid.tile_count(), 50);
        assert_eq!(grid.id_of(3, 2).unwrap(), 23);
        assert_eq!(grid.pos_of(23).unwrap(), TilePos { x: 3, y: 2 });
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let grid = SpatialGrid::new(10, 5);
        assert_eq!(
            grid.id_of(10, 0),
            Err(SpatialError::OutOfBounds {
                x: 10,
                y: 0,
                width: 10,
                height: 5
            })
        );
        assert!(matches!(
            grid.pos_of(50),
            Err(SpatialError::TileOutOfBounds { id: 50, .. })
        ));
        assert!(grid.neighbors(50).is_err());
        assert!(grid.distance(0, 50).is_err());
    }

    #[test]
    fn corner_edge_and_interior_neighbors() {
        let grid = SpatialGrid::new(10, 5);
        assert_eq!(grid.neighbors(0).unwrap(), vec![1, 10, 11]);
        assert_eq!(grid.neighbors(grid.id_of(5, 0).unwrap()).unwrap().len(), 5);
        let mid = grid.id_of(5, 2).unwrap();
        assert_eq!(
            grid.neighbors(mid).unwrap(),
            vec![14, 15, 16, 24, 26, 34, 35, 36]
        );
    }

    #[test]
    fn toroidal_corner_wraps() {
        let grid = SpatialGrid::new(10, 5).with_toroidal(true);
        let mut n = grid.neighbors(0).unwrap();
        n.sort();
        assert_eq!(n, vec![1, 9, 10, 11, 19, 40, 41, 49]);
    }

    #[test]
    fn toroidal_narrow_grid_has_no_duplicates() {
        let grid = SpatialGrid::new(2, 1).with_toroidal(true);
        assert_eq!(grid.neighbors(0).unwrap(), vec![1]);
        let single = SpatialGrid::new(1, 1).with_toroidal(true);
        assert!(single.neighbors(0).unwrap().is_empty());
    }

    #[test]
    fn chebyshev_distance() {
        let grid = SpatialGrid::new(10, 5);
        let a = grid.id_of(0, 0).unwrap();
        let b = grid.id_of(3, 4).unwrap();
        assert_eq!(grid.distance(a, b).unwrap(), 4);
        assert_eq!(grid.distance(b, a).unwrap(), 4);
        assert_eq!(grid.distance(a, a).unwrap(), 0);
    }

    #[test]
    fn toroidal_distance_takes_short_way() {
        let grid = SpatialGrid::new(10, 5).with_toroidal(true);
        let a = grid.id_of(0, 0).unwrap();
        let b = grid.id_of(9, 4).unwrap();
        assert_eq!(grid.distance(a, b).unwrap(), 1);
    }

    #[test]
    fn every_neighbor_is_at_distance_one() {
        for toroidal in [false, true] {
            let grid = SpatialGrid::new(7, 4).with_toroidal(toroidal);
            for id in grid.ids() {
                for n in grid.neighbors(id).unwrap() {
                    assert_eq!(grid.distance(id, n).unwrap(), 1);
                }
            }
        }
    }

    #[test]
    fn clamp_is_explicit() {
        let grid = SpatialGrid::new(10, 5);
        assert_eq!(grid.clamp_to_grid(-3, 2), grid.id_of(0, 2).unwrap());
        assert_eq!(grid.clamp_to_grid(50, 50), grid.id_of(9, 4).unwrap());
    }

    #[test]
    fn regions_partition_grid() {
        let grid = SpatialGrid::new(128, 64);
        assert_eq!(grid.region_of(0, 16).unwrap(), (0, 0));
        assert_eq!(grid.region_of(grid.id_of(127, 63).unwrap(), 16).unwrap(), (7, 3));
    }

    #[test]
    #[should_panic(expected = "grid dimensions must be positive")]
    fn zero_width_panics() {
        SpatialGrid::new(0, 4);
    }
}
