//! Raster access for tile pyramid generation.
//!
//! A pyramid build reads its native level through [`RasterSource`], slices
//! it into tiles, then derives each coarser level with [`downsample_2x`].
//!
//! # Architecture
//!
//! ```text
//! decode_file / custom RasterSource
//!      │
//!      ▼
//! CachedRasterSource ──► BlockCache (LRU, bounded by a memory fraction)
//!      │
//!      ├─► tile reads for level 0
//!      │
//!      └─► downsample_2x (strip reads) ──► Raster for level 1, 2, ...
//! ```
//!
//! Geodetic footprints come from a [`CameraModel`].

pub mod cache;
pub mod camera;
pub mod decode;
pub mod downsample;
pub mod error;
pub mod raster;
pub mod source;

pub use cache::{
    cache_budget, detect_memory_limit, shared_cache, BlockCache, CacheStats, CachedRasterSource,
    SharedBlockCache,
};
pub use camera::{AffineCameraModel, CameraModel, FourCornerCameraModel, PixelCameraModel};
pub use decode::{decode_bytes, decode_file, probe_dimensions};
pub use downsample::{downsample_2x, downsample_raster, DownsampleMethod, DEFAULT_STRIP_ROWS};
pub use error::{RasterError, Result};
pub use raster::{max_sample_value, Raster, TileImage};
pub use source::RasterSource;
