//! Outcome summaries for single-source builds and mosaics.

use pyramid_common::{ImageKey, TileAddress};
use serde::Serialize;

/// A tile that was not published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTile {
    pub address: TileAddress,
    pub reason: String,
}

/// Result of publishing one level of one raster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelReport {
    pub level: u32,
    pub part: usize,
    pub tiles_published: u64,
    pub bytes_written: u64,
    pub failed: Vec<FailedTile>,
}

impl LevelReport {
    pub fn new(level: u32, part: usize) -> Self {
        Self {
            level,
            part,
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of a single-source pyramid build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub image: ImageKey,
    pub max_rlevel: u32,
    pub metadata_only: bool,
    pub levels: Vec<LevelReport>,
    /// Entries in the published index.
    pub index_entries: usize,
}

impl BuildReport {
    pub fn tiles_published(&self) -> u64 {
        self.levels.iter().map(|l| l.tiles_published).sum()
    }

    pub fn bytes_written(&self) -> u64 {
        self.levels.iter().map(|l| l.bytes_written).sum()
    }

    pub fn failed_tiles(&self) -> impl Iterator<Item = &FailedTile> {
        self.levels.iter().flat_map(|l| l.failed.iter())
    }

    /// No tile failed.
    pub fn is_complete(&self) -> bool {
        self.levels.iter().all(LevelReport::is_complete)
    }
}

/// Progress of one mosaic part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartReport {
    pub name: String,
    pub row: u32,
    pub col: u32,
    /// Highest level this part published.
    pub reached_level: u32,
    pub levels: Vec<LevelReport>,
}

/// A part left out of the mosaic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPart {
    pub name: String,
    pub reason: String,
}

/// Result of a multi-part mosaic build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MosaicReport {
    pub image: ImageKey,
    pub parts: Vec<PartReport>,
    pub skipped: Vec<SkippedPart>,
    /// Highest level every completed part contributed tiles to.
    /// Coarser levels need a reduction pass over the published tiles.
    pub last_rset_processed: Option<u32>,
    pub index_entries: usize,
}

impl MosaicReport {
    pub fn tiles_published(&self) -> u64 {
        self.parts
            .iter()
            .flat_map(|p| p.levels.iter())
            .map(|l| l.tiles_published)
            .sum()
    }

    pub fn failed_tiles(&self) -> impl Iterator<Item = &FailedTile> {
        self.parts
            .iter()
            .flat_map(|p| p.levels.iter())
            .flat_map(|l| l.failed.iter())
    }
}

/// Highest level reached by every part.
pub fn last_rset_processed<'a>(parts: impl IntoIterator<Item = &'a PartReport>) -> Option<u32> {
    parts.into_iter().map(|p| p.reached_level).min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(name: &str, reached_level: u32) -> PartReport {
        PartReport {
            name: name.to_string(),
            row: 0,
            col: 0,
            reached_level,
            levels: Vec::new(),
        }
    }

    #[test]
    fn test_last_rset_is_minimum_reached_level() {
        let parts = vec![part("a", 3), part("b", 2)];
        assert_eq!(last_rset_processed(&parts), Some(2));
    }

    #[test]
    fn test_last_rset_empty() {
        assert_eq!(last_rset_processed(&Vec::<PartReport>::new()), None);
    }

    #[test]
    fn test_level_report_completeness() {
        let mut level = LevelReport::new(0, 0);
        assert!(level.is_complete());
        level.failed.push(FailedTile {
            address: TileAddress::new(0, 0, 0, 0),
            reason: "disk full".into(),
        });
        assert!(!level.is_complete());
    }
}
