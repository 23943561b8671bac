//! Error types for the ingestion crate.

use thiserror::Error;

/// Errors that can occur while building a pyramid.
///
/// Everything here is fatal for the image being built. Per-tile write
/// failures are not errors; they are collected into the build report.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Unsupported raster layout: {0}")]
    UnsupportedLayout(String),

    #[error("Failed to decode source: {0}")]
    Decode(String),

    #[error("Failed to publish metadata: {0}")]
    Metadata(String),

    #[error("Invalid mosaic manifest: {0}")]
    Manifest(String),

    #[error("Level {level} timed out with {remaining} tile regions outstanding")]
    LevelTimedOut { level: u32, remaining: usize },

    #[error("No usable parts in mosaic")]
    NoUsableParts,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Event source error: {0}")]
    Event(String),

    #[error(transparent)]
    Raster(#[from] raster::RasterError),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Pyramid(#[from] pyramid_common::PyramidError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
