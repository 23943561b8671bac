//! Explicit work items for level publication.

use pyramid_common::{PixelRect, TileAddress};
use serde::Serialize;

/// One level of one raster to publish, placed on the global tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelWork {
    /// Part index within a mosaic; 0 for single-source builds.
    pub part: usize,
    pub level: u32,
    pub row_offset: u32,
    pub col_offset: u32,
}

impl LevelWork {
    /// A single-source level at the grid origin.
    pub fn single(level: u32) -> Self {
        Self {
            part: 0,
            level,
            row_offset: 0,
            col_offset: 0,
        }
    }

    /// A mosaic part's level, offset by the part's position on the part grid.
    ///
    /// `tiles_x`/`tiles_y` are the part's tile counts at level 0; the count
    /// halves (integer division) at each level.
    pub fn for_part(
        part: usize,
        level: u32,
        part_row: u32,
        part_col: u32,
        tiles_x: u32,
        tiles_y: u32,
    ) -> Self {
        Self {
            part,
            level,
            row_offset: tiles_y.checked_shr(level).unwrap_or(0) * part_row,
            col_offset: tiles_x.checked_shr(level).unwrap_or(0) * part_col,
        }
    }

    /// Absolute address of a level-local tile.
    pub fn address(&self, col: u32, row: u32, band: u32) -> TileAddress {
        TileAddress::new(self.level, col, row, band).offset_by(self.row_offset, self.col_offset)
    }
}

/// One tile region; a single task publishes every band of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileWork {
    pub part: usize,
    /// Absolute address of band 0.
    pub address: TileAddress,
    /// Pixel region within the level raster.
    pub rect: PixelRect,
    pub bands: u32,
}

impl TileWork {
    pub fn band_address(&self, band: u32) -> TileAddress {
        TileAddress { band, ..self.address }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_has_no_offset() {
        let work = LevelWork::single(2);
        assert_eq!(work.address(1, 0, 0), TileAddress::new(2, 1, 0, 0));
    }

    #[test]
    fn test_part_offsets_halve_per_level() {
        // 4x2 tiles per part, part at row 1 col 2
        let l0 = LevelWork::for_part(3, 0, 1, 2, 4, 2);
        assert_eq!((l0.row_offset, l0.col_offset), (2, 8));

        let l1 = LevelWork::for_part(3, 1, 1, 2, 4, 2);
        assert_eq!((l1.row_offset, l1.col_offset), (1, 4));

        let l2 = LevelWork::for_part(3, 2, 1, 2, 4, 2);
        assert_eq!((l2.row_offset, l2.col_offset), (0, 2));
        assert_eq!(l2.address(0, 0, 1), TileAddress::new(2, 2, 0, 1));
    }

    #[test]
    fn test_band_address() {
        let work = TileWork {
            part: 0,
            address: TileAddress::new(1, 3, 4, 0),
            rect: PixelRect::new(0, 0, 8, 8),
            bands: 3,
        };
        assert_eq!(work.band_address(2), TileAddress::new(1, 3, 4, 2));
    }
}
