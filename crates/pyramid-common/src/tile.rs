//! R-level arithmetic and tile addressing.
//!
//! Level 0 is native resolution and every following level halves both
//! dimensions, rounding up. The deepest level is the first one whose
//! larger dimension fits in a single tile.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::{PyramidError, PyramidResult};

/// Tile edge length used throughout the pyramid.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Smallest `L` such that `max(width, height) <= tile_size * 2^L`.
///
/// Equivalent to `max(0, ceil(log2(max(w, h) / T)))` without floating point.
pub fn max_rlevel(width: u32, height: u32, tile_size: u32) -> u32 {
    let extent = u64::from(width.max(height));
    let tile = u64::from(tile_size.max(1));
    let mut level = 0;
    while extent > tile << level {
        level += 1;
    }
    level
}

/// Pixel extent of one axis at `level`: `ceil(dim / 2^level)`.
pub fn level_dimension(dim: u32, level: u32) -> u32 {
    if level >= 32 {
        return u32::from(dim > 0);
    }
    let scale = 1u64 << level;
    ((u64::from(dim) + scale - 1) / scale) as u32
}

/// Number of tiles needed to cover `dim` pixels.
pub fn tiles_per_axis(dim: u32, tile_size: u32) -> u32 {
    dim.div_ceil(tile_size.max(1))
}

/// A rectangle in pixel space of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True when `other` lies entirely inside this rectangle.
    pub fn contains(&self, other: &PixelRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Overlap of two rectangles, `None` when they are disjoint.
    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Address of one single-band tile: (rlevel, column, row, band).
///
/// Ordered by level, then band, then row, then column, which is the
/// layout of the binary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileAddress {
    pub rlevel: u32,
    pub col: u32,
    pub row: u32,
    pub band: u32,
}

impl TileAddress {
    pub fn new(rlevel: u32, col: u32, row: u32, band: u32) -> Self {
        Self {
            rlevel,
            col,
            row,
            band,
        }
    }

    /// Same tile position shifted by a tile-grid offset.
    pub fn offset_by(&self, row_offset: u32, col_offset: u32) -> Self {
        Self {
            rlevel: self.rlevel,
            col: self.col + col_offset,
            row: self.row + row_offset,
            band: self.band,
        }
    }
}

impl Ord for TileAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.rlevel, self.band, self.row, self.col).cmp(&(
            other.rlevel,
            other.band,
            other.row,
            other.col,
        ))
    }
}

impl PartialOrd for TileAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dimensions and tile grid of a single r-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelShape {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub cols: u32,
    pub rows: u32,
}

impl LevelShape {
    /// Tiles per band at this level.
    pub fn tile_count(&self) -> u64 {
        u64::from(self.cols) * u64::from(self.rows)
    }

    /// Pixel region covered by tile (col, row), clipped at the right and
    /// bottom edges.
    pub fn tile_rect(&self, col: u32, row: u32) -> Option<PixelRect> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        let x = col * self.tile_size;
        let y = row * self.tile_size;
        Some(PixelRect::new(
            x,
            y,
            self.tile_size.min(self.width - x),
            self.tile_size.min(self.height - y),
        ))
    }

    /// Full extent of the level.
    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }
}

/// Level plan for one raster: depth plus per-level shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPlan {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub max_rlevel: u32,
}

impl LevelPlan {
    pub fn new(width: u32, height: u32, tile_size: u32) -> PyramidResult<Self> {
        if width == 0 || height == 0 {
            return Err(PyramidError::InvalidDimensions { width, height });
        }
        if tile_size == 0 {
            return Err(PyramidError::InvalidTileSize(tile_size));
        }
        Ok(Self {
            width,
            height,
            tile_size,
            max_rlevel: max_rlevel(width, height, tile_size),
        })
    }

    /// Number of levels, `max_rlevel + 1`.
    pub fn level_count(&self) -> u32 {
        self.max_rlevel + 1
    }

    /// Shape of `level`, or `None` past the deepest level.
    pub fn level(&self, level: u32) -> Option<LevelShape> {
        if level > self.max_rlevel {
            return None;
        }
        let width = level_dimension(self.width, level);
        let height = level_dimension(self.height, level);
        Some(LevelShape {
            level,
            width,
            height,
            tile_size: self.tile_size,
            cols: tiles_per_axis(width, self.tile_size),
            rows: tiles_per_axis(height, self.tile_size),
        })
    }

    /// All levels from native resolution down to `max_rlevel`.
    pub fn levels(&self) -> impl Iterator<Item = LevelShape> + '_ {
        (0..=self.max_rlevel).filter_map(move |l| self.level(l))
    }

    /// Total number of tiles across every level and band.
    pub fn total_tiles(&self, band_count: u32) -> u64 {
        self.levels().map(|s| s.tile_count()).sum::<u64>() * u64::from(band_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_rlevel_exact_tile() {
        assert_eq!(max_rlevel(512, 512, 512), 0);
    }

    #[test]
    fn test_max_rlevel_sub_tile() {
        assert_eq!(max_rlevel(10, 3, 512), 0);
        assert_eq!(max_rlevel(0, 0, 512), 0);
    }

    #[test]
    fn test_max_rlevel_one_past_tile() {
        assert_eq!(max_rlevel(513, 1, 512), 1);
        assert_eq!(max_rlevel(1025, 1025, 512), 2);
    }

    #[test]
    fn test_max_rlevel_matches_log_formula() {
        for dim in [1u32, 100, 511, 512, 513, 1024, 1025, 4096, 5000, 70_001] {
            let expected = ((dim as f64) / 512.0).log2().ceil().max(0.0) as u32;
            assert_eq!(max_rlevel(dim, 1, 512), expected, "dim={}", dim);
        }
    }

    #[test]
    fn test_level_dimension_rounds_up() {
        assert_eq!(level_dimension(1025, 1), 513);
        assert_eq!(level_dimension(1025, 2), 257);
        assert_eq!(level_dimension(1, 5), 1);
        assert_eq!(level_dimension(7, 40), 1);
    }

    #[test]
    fn test_tile_rect_clips_at_edges() {
        let plan = LevelPlan::new(1536, 1025, 512).unwrap();
        let level0 = plan.level(0).unwrap();
        assert_eq!(level0.tile_rect(2, 2), Some(PixelRect::new(1024, 1024, 512, 1)));
        assert_eq!(level0.tile_rect(3, 0), None);
    }

    #[test]
    fn test_address_ordering() {
        let mut addrs = vec![
            TileAddress::new(1, 0, 0, 0),
            TileAddress::new(0, 1, 0, 1),
            TileAddress::new(0, 1, 0, 0),
            TileAddress::new(0, 0, 1, 0),
        ];
        addrs.sort();
        assert_eq!(
            addrs,
            vec![
                TileAddress::new(0, 1, 0, 0),
                TileAddress::new(0, 0, 1, 0),
                TileAddress::new(0, 1, 0, 1),
                TileAddress::new(1, 0, 0, 0),
            ]
        );
    }

    #[test]
    fn test_rect_intersection() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(5, 8, 10, 10);
        assert_eq!(a.intersection(&b), Some(PixelRect::new(5, 8, 5, 2)));
        assert_eq!(a.intersection(&PixelRect::new(10, 0, 1, 1)), None);
    }
}
