//! MRF binary tile index.
//!
//! The index is a flat sequence of 16-byte records, one per tile in
//! (rlevel, band, row, col) order. Each record is a big-endian `u64` offset
//! followed by a big-endian `u64` size; offsets are the running sum of the
//! preceding sizes, as if the tiles were concatenated into one data file.

use bytes::{Buf, BufMut, BytesMut};
use pyramid_common::{ImageKey, LevelPlan, TileAddress};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::Write;

use crate::{Result, StorageError};

/// Bytes per index record.
pub const INDEX_ENTRY_SIZE: usize = 16;

/// One successfully published tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MrfTileRef {
    pub collection_id: String,
    pub collect_time: String,
    pub address: TileAddress,
    pub byte_size: u64,
}

impl MrfTileRef {
    pub fn new(key: &ImageKey, address: TileAddress, byte_size: u64) -> Self {
        Self {
            collection_id: key.collection_id.clone(),
            collect_time: key.collect_time_string(),
            address,
            byte_size,
        }
    }
}

impl Ord for MrfTileRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address
            .cmp(&other.address)
            .then_with(|| self.collection_id.cmp(&other.collection_id))
            .then_with(|| self.collect_time.cmp(&other.collect_time))
            .then_with(|| self.byte_size.cmp(&other.byte_size))
    }
}

impl PartialOrd for MrfTileRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Location of one tile inside the virtual concatenated data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub address: TileAddress,
    pub offset: u64,
    pub size: u64,
}

/// Sorted tile references for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MrfIndexFile {
    tiles: Vec<MrfTileRef>,
}

impl MrfIndexFile {
    pub fn new(tiles: impl IntoIterator<Item = MrfTileRef>) -> Self {
        let mut tiles: Vec<MrfTileRef> = tiles.into_iter().collect();
        tiles.sort();
        tiles.dedup();
        Self { tiles }
    }

    pub fn tiles(&self) -> &[MrfTileRef] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Sum of all tile sizes.
    pub fn data_size(&self) -> u64 {
        self.tiles.iter().map(|t| t.byte_size).sum()
    }

    /// Records in index order with their cumulative offsets.
    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        self.tiles.iter().scan(0u64, |offset, t| {
            let entry = IndexEntry {
                address: t.address,
                offset: *offset,
                size: t.byte_size,
            };
            *offset += t.byte_size;
            Some(entry)
        })
    }

    /// Record for `address`, found by binary search.
    pub fn lookup(&self, address: &TileAddress) -> Option<IndexEntry> {
        let idx = self
            .tiles
            .binary_search_by(|t| t.address.cmp(address))
            .ok()?;
        let offset = self.tiles[..idx].iter().map(|t| t.byte_size).sum();
        Some(IndexEntry {
            address: *address,
            offset,
            size: self.tiles[idx].byte_size,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.tiles.len() * INDEX_ENTRY_SIZE);
        for entry in self.entries() {
            buf.put_u64(entry.offset);
            buf.put_u64(entry.size);
        }
        buf.to_vec()
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_all(&self.to_bytes())?;
        writer.flush()
    }

    /// Decode an index written for a complete pyramid of `band_count` bands.
    ///
    /// Records are matched positionally against every (level, band, row,
    /// col) of `plan`, so the index must contain exactly one record per tile.
    pub fn read_from(
        mut bytes: &[u8],
        key: &ImageKey,
        plan: &LevelPlan,
        band_count: u32,
    ) -> Result<Self> {
        let expected = plan.total_tiles(band_count) as usize;
        if bytes.len() != expected * INDEX_ENTRY_SIZE {
            return Err(StorageError::InvalidIndex(format!(
                "expected {} records ({} bytes), got {} bytes",
                expected,
                expected * INDEX_ENTRY_SIZE,
                bytes.len()
            )));
        }

        let mut tiles = Vec::with_capacity(expected);
        let mut running = 0u64;
        for shape in plan.levels() {
            for band in 0..band_count {
                for row in 0..shape.rows {
                    for col in 0..shape.cols {
                        let offset = bytes.get_u64();
                        let size = bytes.get_u64();
                        if offset != running {
                            return Err(StorageError::InvalidIndex(format!(
                                "record for level {} band {} ({}, {}) has offset {}, expected {}",
                                shape.level, band, col, row, offset, running
                            )));
                        }
                        running += size;
                        tiles.push(MrfTileRef::new(
                            key,
                            TileAddress::new(shape.level, col, row, band),
                            size,
                        ));
                    }
                }
            }
        }
        Ok(Self { tiles })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn key() -> ImageKey {
        ImageKey::new("C", Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap(), Utc::now()).unwrap()
    }

    fn tile(level: u32, col: u32, row: u32, band: u32, size: u64) -> MrfTileRef {
        MrfTileRef::new(&key(), TileAddress::new(level, col, row, band), size)
    }

    #[test]
    fn test_sorted_by_level_band_row_col() {
        let index = MrfIndexFile::new(vec![
            tile(1, 0, 0, 0, 5),
            tile(0, 1, 0, 0, 3),
            tile(0, 0, 1, 0, 4),
            tile(0, 0, 0, 1, 6),
            tile(0, 0, 0, 0, 2),
        ]);
        let order: Vec<_> = index.tiles().iter().map(|t| t.address).collect();
        assert_eq!(
            order,
            vec![
                TileAddress::new(0, 0, 0, 0),
                TileAddress::new(0, 1, 0, 0),
                TileAddress::new(0, 0, 1, 0),
                TileAddress::new(0, 0, 0, 1),
                TileAddress::new(1, 0, 0, 0),
            ]
        );
    }

    #[test]
    fn test_serialized_offsets_are_cumulative() {
        let index = MrfIndexFile::new(vec![tile(0, 0, 0, 0, 10), tile(0, 1, 0, 0, 7)]);
        let bytes = index.to_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..8], &0u64.to_be_bytes());
        assert_eq!(&bytes[8..16], &10u64.to_be_bytes());
        assert_eq!(&bytes[16..24], &10u64.to_be_bytes());
        assert_eq!(&bytes[24..32], &7u64.to_be_bytes());
        assert_eq!(index.data_size(), 17);
    }

    #[test]
    fn test_lookup() {
        let index = MrfIndexFile::new(vec![
            tile(0, 0, 0, 0, 10),
            tile(0, 1, 0, 0, 7),
            tile(1, 0, 0, 0, 3),
        ]);
        let entry = index.lookup(&TileAddress::new(1, 0, 0, 0)).unwrap();
        assert_eq!((entry.offset, entry.size), (17, 3));
        assert!(index.lookup(&TileAddress::new(2, 0, 0, 0)).is_none());
    }

    #[test]
    fn test_read_back_full_pyramid() {
        let plan = LevelPlan::new(600, 100, 512).unwrap();
        // level 0: 2x1 tiles, level 1: 1x1 tile; two bands
        let mut tiles = Vec::new();
        for shape in plan.levels() {
            for band in 0..2 {
                for row in 0..shape.rows {
                    for col in 0..shape.cols {
                        tiles.push(tile(shape.level, col, row, band, 100 + col as u64 + band as u64));
                    }
                }
            }
        }
        let index = MrfIndexFile::new(tiles);
        let back = MrfIndexFile::read_from(&index.to_bytes(), &key(), &plan, 2).unwrap();
        assert_eq!(back, index);
    }

    #[test]
    fn test_read_rejects_short_index() {
        let plan = LevelPlan::new(600, 100, 512).unwrap();
        let index = MrfIndexFile::new(vec![tile(0, 0, 0, 0, 1)]);
        assert!(matches!(
            MrfIndexFile::read_from(&index.to_bytes(), &key(), &plan, 1),
            Err(StorageError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_write_to() {
        let index = MrfIndexFile::new(vec![tile(0, 0, 0, 0, 4)]);
        let mut out = Vec::new();
        index.write_to(&mut out).unwrap();
        assert_eq!(out, index.to_bytes());
    }
}
