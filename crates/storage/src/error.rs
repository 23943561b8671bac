//! Error types for pyramid storage.

use pyramid_common::PyramidError;
use thiserror::Error;

/// Errors raised by sinks, stores and the ingest queue.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Tile encoding failed: {0}")]
    Encode(String),

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Pyramid(#[from] PyramidError),
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
