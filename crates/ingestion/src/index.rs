//! Per-build accumulation of tile references.

use pyramid_common::{ImageKey, TileAddress};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use storage::{MrfIndexFile, MrfTileRef, TileSink};
use tracing::info;

use crate::Result;

/// Collects one [`MrfTileRef`] per successful tile write.
///
/// Owned by a single build call and shared with that build's tile tasks.
/// A later write of the same address replaces the earlier one.
#[derive(Clone, Default)]
pub struct IndexBuilder {
    refs: Arc<Mutex<BTreeMap<TileAddress, MrfTileRef>>>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn refs(&self) -> MutexGuard<'_, BTreeMap<TileAddress, MrfTileRef>> {
        self.refs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, tile: MrfTileRef) {
        self.refs().insert(tile.address, tile);
    }

    pub fn len(&self) -> usize {
        self.refs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs().is_empty()
    }

    /// Index of everything recorded so far, leaving the state intact.
    pub fn snapshot(&self) -> MrfIndexFile {
        MrfIndexFile::new(self.refs().values().cloned())
    }

    /// Take the accumulated references and reset.
    pub fn finish(&self) -> MrfIndexFile {
        let refs = std::mem::take(&mut *self.refs());
        MrfIndexFile::new(refs.into_values())
    }

    /// Publish the index through the sink and reset.
    pub fn publish(&self, sink: &dyn TileSink, key: &ImageKey) -> Result<MrfIndexFile> {
        let index = self.finish();
        sink.handle_mrf(key, &index)?;
        info!(image = %key, tiles = index.len(), data_size = index.data_size(), "Index finalized");
        Ok(index)
    }
}
