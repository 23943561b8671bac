//! Sink contract and the layout-aware sink shared by every backend.

use pyramid_common::{ImageKey, TileAddress, TilePyramidDescriptor};
use raster::TileImage;
use tracing::{debug, instrument, warn};

use crate::layout::PyramidLayout;
use crate::mrf::{MrfIndexFile, MrfTileRef};
use crate::png::encode_tile;
use crate::{Result, StorageError};

/// Result of publishing one tile.
///
/// Tile writes never raise: a failed write is reported here so the caller
/// can keep publishing the rest of the level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileWriteOutcome {
    Written { bytes: u64 },
    Failed { reason: String },
}

impl TileWriteOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, TileWriteOutcome::Written { .. })
    }
}

/// Destination of a pyramid build.
///
/// Calls are blocking and may arrive from many worker threads at once.
pub trait TileSink: Send + Sync {
    /// Publish the descriptor. Runs before any tile of the image.
    fn handle_metadata(&self, key: &ImageKey, descriptor: &TilePyramidDescriptor) -> Result<()>;

    /// Publish one single-band tile.
    fn handle_tile(&self, key: &ImageKey, address: TileAddress, tile: &TileImage)
        -> TileWriteOutcome;

    /// Publish the finished index for the image.
    fn handle_mrf(&self, key: &ImageKey, index: &MrfIndexFile) -> Result<()>;
}

/// A listed object and its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub key: String,
    pub size: u64,
}

/// Blocking key/value byte store behind a [`PyramidSink`].
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Every object whose key starts with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>>;

    /// Human readable location, used in logs.
    fn describe(&self) -> String;
}

/// Sink writing the canonical layout (PNG tiles, JSON metadata, MRF index)
/// into any [`BlobStore`].
pub struct PyramidSink<B> {
    store: B,
    layout: PyramidLayout,
}

impl<B: BlobStore> PyramidSink<B> {
    pub fn new(store: B) -> Self {
        Self::with_layout(store, PyramidLayout::new())
    }

    pub fn with_layout(store: B, layout: PyramidLayout) -> Self {
        Self { store, layout }
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    pub fn layout(&self) -> &PyramidLayout {
        &self.layout
    }

    /// Reader over the same store and layout.
    pub fn accessor(&self) -> PyramidAccessor<'_, B> {
        PyramidAccessor {
            store: &self.store,
            layout: &self.layout,
        }
    }
}

impl<B: BlobStore> TileSink for PyramidSink<B> {
    #[instrument(skip(self, descriptor), fields(image = %key, store = %self.store.describe()))]
    fn handle_metadata(&self, key: &ImageKey, descriptor: &TilePyramidDescriptor) -> Result<()> {
        let bytes = descriptor.to_json_bytes()?;
        self.store.put(&self.layout.metadata_key(key), bytes)?;
        debug!(max_rlevel = descriptor.max_r_level, "Published metadata");
        Ok(())
    }

    fn handle_tile(
        &self,
        key: &ImageKey,
        address: TileAddress,
        tile: &TileImage,
    ) -> TileWriteOutcome {
        let png = match encode_tile(tile) {
            Ok(png) => png,
            Err(e) => return TileWriteOutcome::failed(e.to_string()),
        };
        let size = png.len() as u64;
        let tile_key = self.layout.tile_key(key, &address);
        match self.store.put(&tile_key, png) {
            Ok(()) => TileWriteOutcome::Written { bytes: size },
            Err(e) => {
                warn!(key = %tile_key, error = %e, "Tile write failed");
                TileWriteOutcome::failed(e.to_string())
            }
        }
    }

    #[instrument(skip(self, index), fields(image = %key, tiles = index.len()))]
    fn handle_mrf(&self, key: &ImageKey, index: &MrfIndexFile) -> Result<()> {
        self.store.put(&self.layout.index_key(key), index.to_bytes())?;
        debug!(data_size = index.data_size(), "Published index");
        Ok(())
    }
}

/// Read side of a published pyramid.
pub struct PyramidAccessor<'a, B> {
    store: &'a B,
    layout: &'a PyramidLayout,
}

impl<'a, B: BlobStore> PyramidAccessor<'a, B> {
    pub fn new(store: &'a B, layout: &'a PyramidLayout) -> Self {
        Self { store, layout }
    }

    pub fn read_descriptor(&self, key: &ImageKey) -> Result<TilePyramidDescriptor> {
        let bytes = self.store.get(&self.layout.metadata_key(key))?;
        Ok(TilePyramidDescriptor::from_json_slice(&bytes)?)
    }

    /// Decode the published index using the shape from the descriptor.
    pub fn read_index(&self, key: &ImageKey) -> Result<MrfIndexFile> {
        let descriptor = self.read_descriptor(key)?;
        let plan = descriptor.level_plan()?;
        let bytes = self.store.get(&self.layout.index_key(key))?;
        MrfIndexFile::read_from(&bytes, key, &plan, descriptor.num_bands)
    }

    pub fn read_tile(&self, key: &ImageKey, address: &TileAddress) -> Result<Vec<u8>> {
        self.store.get(&self.layout.tile_key(key, address))
    }

    /// Rebuild an index by listing the tiles actually present in the store.
    pub fn crawl_index(&self, key: &ImageKey) -> Result<MrfIndexFile> {
        let prefix = format!("{}/", self.layout.image_prefix(key));
        let collect_time = key.collect_time_string();
        let tiles = self
            .store
            .list(&prefix)?
            .into_iter()
            .filter_map(|entry| {
                let parsed = self.layout.parse_tile_key(&entry.key)?;
                (parsed.collection_id == key.collection_id && parsed.collect_time == collect_time)
                    .then(|| MrfTileRef::new(key, parsed.address, entry.size))
            });
        Ok(MrfIndexFile::new(tiles))
    }

    /// Whether a descriptor has been published for `key`.
    pub fn exists(&self, key: &ImageKey) -> Result<bool> {
        match self.store.get(&self.layout.metadata_key(key)) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
