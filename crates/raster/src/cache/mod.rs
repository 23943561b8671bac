//! Block caching for raster sources.

mod block_cache;
mod memory;

pub use block_cache::{
    shared_cache, BlockCache, BlockKey, CacheStats, CachedRasterSource, SharedBlockCache,
};
pub use memory::{cache_budget, detect_memory_limit};
