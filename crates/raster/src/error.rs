//! Error types for raster access.

use pyramid_common::{PixelRect, PyramidError};
use thiserror::Error;

/// Errors that can occur while reading or reducing rasters.
#[derive(Error, Debug)]
pub enum RasterError {
    /// The raster layout cannot be tiled (band count, sample size, buffer length).
    #[error("unsupported raster layout: {0}")]
    UnsupportedLayout(String),

    /// The requested region is outside the raster bounds.
    #[error("requested region {requested:?} is outside raster bounds {bounds:?}")]
    OutOfBounds {
        requested: PixelRect,
        bounds: PixelRect,
    },

    /// Band index past the raster's band count.
    #[error("band {band} out of range (raster has {count} bands)")]
    BandOutOfRange { band: u32, count: u32 },

    /// The source could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Camera model failed to project a point.
    #[error("camera model error: {0}")]
    Camera(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pyramid(#[from] PyramidError),
}

impl RasterError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedLayout(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
