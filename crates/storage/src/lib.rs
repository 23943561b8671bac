//! Storage for published tile pyramids.
//!
//! Provides:
//! - The [`TileSink`] contract a pyramid build publishes against
//! - Canonical key layout, PNG tile encoding and the MRF binary index
//! - Filesystem and object store (MinIO/S3) backends
//! - A Redis Streams queue of new-image notifications

pub mod error;
pub mod filesystem;
pub mod layout;
pub mod mrf;
pub mod object_store;
pub mod png;
pub mod queue;
pub mod sink;

pub use self::object_store::{ObjectStorageConfig, ObjectStoreBlobs, ObjectStoreSink};
pub use error::{Result, StorageError};
pub use filesystem::{FileSystemSink, FileSystemStore};
pub use layout::{ParsedTileKey, PyramidLayout, INDEX_FILE, METADATA_FILE};
pub use mrf::{IndexEntry, MrfIndexFile, MrfTileRef, INDEX_ENTRY_SIZE};
pub use png::encode_tile;
pub use queue::{ClaimedNotification, IngestNotification, IngestQueue};
pub use sink::{BlobEntry, BlobStore, PyramidAccessor, PyramidSink, TileSink, TileWriteOutcome};
