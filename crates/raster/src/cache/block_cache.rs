//! LRU cache for decoded raster blocks.

use lru::LruCache;
use pyramid_common::PixelRect;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::source::check_read;
use crate::{Raster, RasterSource, Result};

/// Cache key for blocks: (source_id, block_col, block_row).
pub type BlockKey = (u64, u32, u32);

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
}

/// LRU cache for decoded blocks with memory-bounded eviction.
pub struct BlockCache {
    cache: LruCache<BlockKey, Arc<Raster>>,
    memory_limit: usize,
    current_memory: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BlockCache {
    /// Create a new block cache with the given memory limit in bytes.
    ///
    /// Eviction is driven by byte accounting alone, so the entry table
    /// grows with use rather than being sized from the limit.
    pub fn new(memory_limit: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            memory_limit,
            current_memory: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a block, counting the hit or miss.
    pub fn get(&mut self, key: &BlockKey) -> Option<Arc<Raster>> {
        if let Some(block) = self.cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(block))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.cache.contains(key)
    }

    /// Insert a block, evicting least recently used blocks to make room.
    ///
    /// Blocks larger than the whole limit are not cached.
    pub fn insert(&mut self, key: BlockKey, block: Arc<Raster>) {
        let size = block.memory_bytes();

        while self.current_memory.saturating_add(size) > self.memory_limit && !self.cache.is_empty() {
            if let Some((_, evicted)) = self.cache.pop_lru() {
                self.current_memory = self.current_memory.saturating_sub(evicted.memory_bytes());
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        if size <= self.memory_limit {
            if let Some(old) = self.cache.put(key, block) {
                self.current_memory = self.current_memory.saturating_sub(old.memory_bytes());
            }
            self.current_memory += size;
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
            memory_bytes: self.current_memory as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached block.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_memory = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Process-wide handle to a block cache shared by several sources.
pub type SharedBlockCache = Arc<Mutex<BlockCache>>;

pub fn shared_cache(memory_limit: usize) -> SharedBlockCache {
    Arc::new(Mutex::new(BlockCache::new(memory_limit)))
}

/// A raster source whose reads go through a block cache.
///
/// The source is divided into `block_size` squares; a read decodes every
/// block it touches once and serves later reads of the same block from
/// memory until the cache evicts it or is flushed.
pub struct CachedRasterSource<S> {
    inner: S,
    cache: SharedBlockCache,
    source_id: u64,
    block_size: u32,
}

impl<S: RasterSource> CachedRasterSource<S> {
    pub fn new(inner: S, cache: SharedBlockCache, source_id: u64, block_size: u32) -> Self {
        Self {
            inner,
            cache,
            source_id,
            block_size: block_size.max(1),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cache(&self) -> &SharedBlockCache {
        &self.cache
    }

    fn block_rect(&self, col: u32, row: u32) -> PixelRect {
        let x = col * self.block_size;
        let y = row * self.block_size;
        PixelRect::new(
            x,
            y,
            self.block_size.min(self.inner.width() - x),
            self.block_size.min(self.inner.height() - y),
        )
    }

    fn block(&self, col: u32, row: u32) -> Result<Arc<Raster>> {
        let key = (self.source_id, col, row);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(block) = cache.get(&key) {
                return Ok(block);
            }
        }

        // Decode outside the lock; concurrent misses on one block both decode.
        let block = Arc::new(self.inner.read(self.block_rect(col, row))?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, Arc::clone(&block));
        }
        Ok(block)
    }

    /// Empty the whole shared cache, including blocks of other sources.
    ///
    /// Called once an image's pyramid is finished.
    pub fn flush(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            let before = cache.len();
            cache.clear();
            debug!(source_id = self.source_id, dropped = before, "Flushed block cache");
        }
    }
}

impl<S: RasterSource> RasterSource for CachedRasterSource<S> {
    fn width(&self) -> u32 {
        self.inner.width()
    }

    fn height(&self) -> u32 {
        self.inner.height()
    }

    fn band_count(&self) -> u32 {
        self.inner.band_count()
    }

    fn bits_per_sample(&self) -> u8 {
        self.inner.bits_per_sample()
    }

    fn read(&self, rect: PixelRect) -> Result<Raster> {
        check_read(self, &rect)?;

        let first_col = rect.x / self.block_size;
        let last_col = (rect.right() - 1) / self.block_size;
        let first_row = rect.y / self.block_size;
        let last_row = (rect.bottom() - 1) / self.block_size;

        // A read inside a single block is a plain crop.
        if first_col == last_col && first_row == last_row {
            let block = self.block(first_col, first_row)?;
            let origin = self.block_rect(first_col, first_row);
            return block.crop(PixelRect::new(
                rect.x - origin.x,
                rect.y - origin.y,
                rect.width,
                rect.height,
            ));
        }

        let mut out = Raster::new(
            rect.width,
            rect.height,
            self.band_count(),
            self.bits_per_sample(),
        )?;
        for row in first_row..=last_row {
            for col in first_col..=last_col {
                let origin = self.block_rect(col, row);
                let Some(overlap) = origin.intersection(&rect) else {
                    continue;
                };
                let block = self.block(col, row)?;
                out.paste(
                    &block,
                    PixelRect::new(
                        overlap.x - origin.x,
                        overlap.y - origin.y,
                        overlap.width,
                        overlap.height,
                    ),
                    overlap.x - rect.x,
                    overlap.y - rect.y,
                )?;
            }
        }
        Ok(out)
    }
}
