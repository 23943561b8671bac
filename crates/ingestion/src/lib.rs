//! Tile pyramid construction.
//!
//! Turns a decoded raster, or a mosaic of raster parts, into a published
//! tile pyramid: a descriptor, one PNG per tile per band per level, and a
//! binary index of every published tile.
//!
//! # Architecture
//!
//! ```text
//! IngestDaemon ──► build_notification ──┐
//!                                        ▼
//! MosaicAssembler ─────────────► PyramidBuilder
//!                                        │ per level, in order
//!                                        ▼
//!                     TileSlicer ──► WorkerPool ──► TileSink::handle_tile
//!                          │  LevelBarrier             │
//!                          ▼                           ▼
//!                     downsample_2x              IndexBuilder ──► handle_mrf
//! ```
//!
//! Tiles within a level are published in parallel; levels are strictly
//! sequential. A tile that fails to publish is reported, not raised.

pub mod builder;
pub mod config;
pub mod error;
pub mod index;
pub mod manifest;
pub mod mosaic;
pub mod pool;
pub mod report;
pub mod slicer;
pub mod trigger;
pub mod work;

// Re-exports
pub use builder::{open_source, validate_source, BuildStage, PyramidBuilder};
pub use config::{default_worker_threads, PyramidConfig};
pub use error::{IngestionError, Result};
pub use index::IndexBuilder;
pub use manifest::{MosaicManifest, PartSpec};
pub use mosaic::{FileSystemPartAccessor, MosaicAssembler, PartAccessor};
pub use pool::{LevelBarrier, WorkerPool};
pub use report::{
    last_rset_processed, BuildReport, FailedTile, LevelReport, MosaicReport, PartReport,
    SkippedPart,
};
pub use slicer::TileSlicer;
pub use trigger::{
    build_notification, BlobSourceResolver, EventSource, IngestDaemon, IngestEvent,
    InMemoryEventSource, LocalFileResolver, Processed, RedisEventSource, SourceResolver,
};
pub use work::{LevelWork, TileWork};
