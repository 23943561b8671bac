//! Error types for pyramid-common.

use thiserror::Error;

/// Result type alias using PyramidError.
pub type PyramidResult<T> = Result<T, PyramidError>;

/// Errors raised while constructing shared pyramid types.
#[derive(Debug, Error)]
pub enum PyramidError {
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid tile size: {0}")]
    InvalidTileSize(u32),

    #[error("Invalid image key: {0}")]
    InvalidImageKey(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
