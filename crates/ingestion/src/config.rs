//! Configuration for pyramid builds.

use pyramid_common::DEFAULT_TILE_SIZE;
use raster::{DownsampleMethod, DEFAULT_STRIP_ROWS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache fraction used for single-source builds.
pub const SINGLE_SOURCE_CACHE_FRACTION: f64 = 0.6;

/// Cache fraction used for multi-part mosaics, which hold a whole part at a time.
pub const MOSAIC_CACHE_FRACTION: f64 = 0.9;

/// Worker count leaving one core for the coordinating thread.
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Settings shared by the single-source builder and the mosaic assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Tile edge length in pixels.
    pub tile_size: u32,

    /// Threads in the tile worker pool.
    pub worker_threads: usize,

    /// Fraction of available memory the block cache may hold.
    pub cache_memory_fraction: f64,

    /// Filter used to derive each coarser level.
    pub downsample_method: DownsampleMethod,

    /// Output rows reduced per source read.
    pub strip_rows: u32,

    /// Deadline for one level's tiles. `None` waits indefinitely.
    pub level_timeout_secs: Option<u64>,

    /// Publish the descriptor and stop.
    pub metadata_only: bool,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            worker_threads: default_worker_threads(),
            cache_memory_fraction: SINGLE_SOURCE_CACHE_FRACTION,
            downsample_method: DownsampleMethod::Mean,
            strip_rows: DEFAULT_STRIP_ROWS,
            level_timeout_secs: None,
            metadata_only: false,
        }
    }
}

impl PyramidConfig {
    /// Defaults with the larger cache share used for mosaics.
    pub fn for_mosaic() -> Self {
        Self {
            cache_memory_fraction: MOSAIC_CACHE_FRACTION,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `PYRAMID_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("PYRAMID_TILE_SIZE") {
            if let Ok(size) = val.parse() {
                self.tile_size = size;
            }
        }

        if let Ok(val) = std::env::var("PYRAMID_WORKER_THREADS") {
            if let Ok(threads) = val.parse() {
                self.worker_threads = threads;
            }
        }

        if let Ok(val) = std::env::var("PYRAMID_CACHE_FRACTION") {
            if let Ok(fraction) = val.parse() {
                self.cache_memory_fraction = fraction;
            }
        }

        if let Ok(val) = std::env::var("PYRAMID_DOWNSAMPLE") {
            if let Ok(method) = val.parse() {
                self.downsample_method = method;
            }
        }

        if let Ok(val) = std::env::var("PYRAMID_LEVEL_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.level_timeout_secs = Some(secs);
            }
        }

        if let Ok(val) = std::env::var("PYRAMID_METADATA_ONLY") {
            self.metadata_only = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Parse a YAML document; missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be > 0".to_string());
        }

        if self.worker_threads == 0 {
            return Err("worker_threads must be > 0".to_string());
        }

        if !(self.cache_memory_fraction > 0.0 && self.cache_memory_fraction <= 1.0) {
            return Err("cache_memory_fraction must be in (0, 1]".to_string());
        }

        if self.strip_rows == 0 {
            return Err("strip_rows must be > 0".to_string());
        }

        if self.level_timeout_secs == Some(0) {
            return Err("level_timeout_secs must be > 0 when set".to_string());
        }

        Ok(())
    }

    pub fn level_timeout(&self) -> Option<Duration> {
        self.level_timeout_secs.map(Duration::from_secs)
    }
}
