//! Sinks for observing and disturbing pyramid builds.

use pyramid_common::{ImageKey, TileAddress, TilePyramidDescriptor};
use raster::TileImage;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use storage::{MrfIndexFile, Result, StorageError, TileSink, TileWriteOutcome};

/// One call received by a [`RecordingSink`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Metadata(ImageKey),
    Tile(ImageKey, TileAddress),
    Index(ImageKey),
}

/// A tile as seen by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTile {
    pub key: ImageKey,
    pub address: TileAddress,
    pub width: u32,
    pub height: u32,
    /// Sum of all samples, for cheap content comparisons.
    pub checksum: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub events: Vec<SinkEvent>,
    pub descriptors: Vec<TilePyramidDescriptor>,
    pub tiles: Vec<RecordedTile>,
    pub indexes: Vec<MrfIndexFile>,
}

/// Keeps everything it is handed in memory.
///
/// Each tile reports its raw sample size as bytes written.
#[derive(Debug, Default)]
pub struct RecordingSink {
    state: Mutex<Recorded>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Recorded {
        self.state().clone()
    }

    pub fn tile_count(&self) -> usize {
        self.state().tiles.len()
    }

    /// Distinct addresses of every recorded tile, sorted.
    pub fn tile_addresses(&self) -> Vec<TileAddress> {
        let mut addrs: Vec<TileAddress> = self.state().tiles.iter().map(|t| t.address).collect();
        addrs.sort();
        addrs.dedup();
        addrs
    }

    pub fn tile(&self, address: TileAddress) -> Option<RecordedTile> {
        self.state()
            .tiles
            .iter()
            .rev()
            .find(|t| t.address == address)
            .cloned()
    }

    pub fn last_descriptor(&self) -> Option<TilePyramidDescriptor> {
        self.state().descriptors.last().cloned()
    }

    pub fn last_index(&self) -> Option<MrfIndexFile> {
        self.state().indexes.last().cloned()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.state().events.clone()
    }
}

impl TileSink for RecordingSink {
    fn handle_metadata(&self, key: &ImageKey, descriptor: &TilePyramidDescriptor) -> Result<()> {
        let mut state = self.state();
        state.events.push(SinkEvent::Metadata(key.clone()));
        state.descriptors.push(descriptor.clone());
        Ok(())
    }

    fn handle_tile(&self, key: &ImageKey, address: TileAddress, tile: &TileImage) -> TileWriteOutcome {
        let bytes_per_sample = if tile.is_wide() { 2 } else { 1 };
        let recorded = RecordedTile {
            key: key.clone(),
            address,
            width: tile.width,
            height: tile.height,
            checksum: tile.samples.iter().map(|&v| u64::from(v)).sum(),
        };
        let mut state = self.state();
        state.events.push(SinkEvent::Tile(key.clone(), address));
        state.tiles.push(recorded);
        TileWriteOutcome::Written {
            bytes: tile.samples.len() as u64 * bytes_per_sample,
        }
    }

    fn handle_mrf(&self, key: &ImageKey, index: &MrfIndexFile) -> Result<()> {
        let mut state = self.state();
        state.events.push(SinkEvent::Index(key.clone()));
        state.indexes.push(index.clone());
        Ok(())
    }
}

/// Wraps a sink and fails selected calls.
pub struct FailingSink<S> {
    inner: S,
    fail_tiles: HashSet<TileAddress>,
    panic_tiles: HashSet<TileAddress>,
    delay_tiles: HashMap<TileAddress, Duration>,
    fail_metadata: bool,
}

impl<S: TileSink> FailingSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_tiles: HashSet::new(),
            panic_tiles: HashSet::new(),
            delay_tiles: HashMap::new(),
            fail_metadata: false,
        }
    }

    /// Report a failed write for `address`.
    pub fn fail_tile(mut self, address: TileAddress) -> Self {
        self.fail_tiles.insert(address);
        self
    }

    /// Panic while writing `address`.
    pub fn panic_on_tile(mut self, address: TileAddress) -> Self {
        self.panic_tiles.insert(address);
        self
    }

    /// Block for `delay` before writing `address`.
    pub fn delay_tile(mut self, address: TileAddress, delay: Duration) -> Self {
        self.delay_tiles.insert(address, delay);
        self
    }

    pub fn fail_metadata(mut self) -> Self {
        self.fail_metadata = true;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: TileSink> TileSink for FailingSink<S> {
    fn handle_metadata(&self, key: &ImageKey, descriptor: &TilePyramidDescriptor) -> Result<()> {
        if self.fail_metadata {
            return Err(StorageError::ObjectStore("injected metadata failure".to_string()));
        }
        self.inner.handle_metadata(key, descriptor)
    }

    fn handle_tile(&self, key: &ImageKey, address: TileAddress, tile: &TileImage) -> TileWriteOutcome {
        if let Some(delay) = self.delay_tiles.get(&address) {
            std::thread::sleep(*delay);
        }
        if self.panic_tiles.contains(&address) {
            panic!("injected panic at {:?}", address);
        }
        if self.fail_tiles.contains(&address) {
            return TileWriteOutcome::failed("injected failure");
        }
        self.inner.handle_tile(key, address, tile)
    }

    fn handle_mrf(&self, key: &ImageKey, index: &MrfIndexFile) -> Result<()> {
        self.inner.handle_mrf(key, index)
    }
}
