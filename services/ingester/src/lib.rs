//! Tile pyramid ingester service.
//!
//! Builds pyramids from local files, assembles multi-part mosaics, and
//! runs as a daemon consuming new-image notifications from Redis.

pub mod commands;
pub mod config;

pub use commands::{
    ingest_file, inspect, open_sink, parse_image_key, run_batch, run_mosaic, BatchOptions,
    BatchSummary, OutputTarget, PyramidSummary,
};
pub use config::{ConfigError, IngesterConfig};
