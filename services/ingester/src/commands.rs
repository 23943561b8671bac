//! Command implementations behind the CLI.
//!
//! Everything here is blocking; callers on the async runtime go through
//! `spawn_blocking`.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use ingestion::{
    open_source, BuildReport, FileSystemPartAccessor, MosaicAssembler, MosaicManifest,
    MosaicReport, PyramidBuilder, PyramidConfig,
};
use pyramid_common::{ImageKey, COLLECT_TIME_FORMAT};
use raster::PixelCameraModel;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{
    FileSystemSink, FileSystemStore, ObjectStoreBlobs, PyramidLayout, PyramidSink, TileSink,
};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::config::IngesterConfig;

/// Where pyramids are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Directory(PathBuf),
    ObjectStore,
}

impl OutputTarget {
    /// Explicit directory, else the configured output root, else the bucket.
    pub fn resolve(output: Option<PathBuf>, config: &IngesterConfig) -> Self {
        match output.or_else(|| config.output_root.clone()) {
            Some(dir) => OutputTarget::Directory(dir),
            None => OutputTarget::ObjectStore,
        }
    }
}

/// Open the sink for `target`. Object store calls run on `runtime`.
pub fn open_sink(
    target: &OutputTarget,
    config: &IngesterConfig,
    runtime: Handle,
) -> Result<Arc<dyn TileSink>> {
    let sink: Arc<dyn TileSink> = match target {
        OutputTarget::Directory(dir) => {
            info!(root = %dir.display(), "Publishing to local directory");
            Arc::new(FileSystemSink::new(FileSystemStore::new(dir)))
        }
        OutputTarget::ObjectStore => {
            let blobs = ObjectStoreBlobs::new(&config.storage, runtime)?;
            let layout = match &config.storage_prefix {
                Some(prefix) => PyramidLayout::with_prefix(prefix),
                None => PyramidLayout::new(),
            };
            info!(bucket = %config.storage.bucket, "Publishing to object storage");
            Arc::new(PyramidSink::with_layout(blobs, layout))
        }
    };
    Ok(sink)
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Replaces the collection id derived from the file name.
    pub collection: Option<String>,
    pub metadata_only: bool,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub built: Vec<BuildReport>,
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Build the pyramid of one local image file.
pub fn ingest_file(
    builder: &PyramidBuilder,
    path: &Path,
    options: &BatchOptions,
) -> ingestion::Result<BuildReport> {
    let mut key = ImageKey::from_file(path)?;
    if let Some(collection) = &options.collection {
        key = ImageKey::new(collection.as_str(), key.collect_time, key.processing_time)?;
    }
    let source = open_source(path)?;
    let metadata = serde_json::json!({ "source": path.display().to_string() });

    if options.metadata_only {
        builder.build_metadata_only(&key, source, &PixelCameraModel, metadata)
    } else {
        builder.build(&key, source, &PixelCameraModel, metadata)
    }
}

/// Build every file in order. A failed file is logged and the batch moves on.
pub fn run_batch(
    builder: &PyramidBuilder,
    files: &[PathBuf],
    options: &BatchOptions,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for path in files {
        match ingest_file(builder, path, options) {
            Ok(report) => {
                if !report.is_complete() {
                    warn!(
                        file = %path.display(),
                        failed = report.failed_tiles().count(),
                        "Pyramid published with missing tiles"
                    );
                }
                info!(
                    file = %path.display(),
                    image = %report.image,
                    levels = report.max_rlevel + 1,
                    tiles = report.tiles_published(),
                    "Built pyramid"
                );
                summary.built.push(report);
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "Build failed");
                summary.failed.push((path.clone(), e.to_string()));
            }
        }
    }
    summary
}

/// Assemble the mosaic described by `manifest_path` from parts in `parts_dir`.
pub fn run_mosaic(
    config: PyramidConfig,
    sink: Arc<dyn TileSink>,
    manifest_path: &Path,
    parts_dir: &Path,
) -> ingestion::Result<MosaicReport> {
    let manifest = MosaicManifest::load(manifest_path)?;
    let assembler = MosaicAssembler::new(config, sink)?;
    let report = assembler.assemble(&manifest, &FileSystemPartAccessor::new(parts_dir))?;
    for skipped in &report.skipped {
        warn!(part = %skipped.name, reason = %skipped.reason, "Part skipped");
    }
    Ok(report)
}

/// Summary of a pyramid already on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyramidSummary {
    pub identifier: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub max_rlevel: u32,
    pub bands: u32,
    pub expected_tiles: u64,
    pub indexed_tiles: usize,
    pub data_size: u64,
}

impl PyramidSummary {
    pub fn is_complete(&self) -> bool {
        self.indexed_tiles as u64 == self.expected_tiles
    }
}

/// Parse a `YYYYMMDDHHMMSS` collect time into an image key.
pub fn parse_image_key(collection: &str, collect_time: &str) -> Result<ImageKey> {
    let collect = NaiveDateTime::parse_from_str(collect_time, COLLECT_TIME_FORMAT)
        .with_context(|| format!("collect time '{}' is not YYYYMMDDHHMMSS", collect_time))?
        .and_utc();
    Ok(ImageKey::new(collection, collect, chrono::Utc::now())?)
}

/// Read the descriptor of a local pyramid and recount its tiles from disk.
pub fn inspect(root: &Path, key: &ImageKey) -> Result<PyramidSummary> {
    let sink = FileSystemSink::new(FileSystemStore::new(root));
    let accessor = sink.accessor();
    if !accessor.exists(key)? {
        return Err(anyhow!("no pyramid for {} under {}", key, root.display()));
    }
    let descriptor = accessor.read_descriptor(key)?;
    let plan = descriptor.level_plan()?;
    let index = accessor.crawl_index(key)?;

    Ok(PyramidSummary {
        expected_tiles: plan.total_tiles(descriptor.num_bands),
        indexed_tiles: index.len(),
        data_size: index.data_size(),
        identifier: descriptor.identifier,
        name: descriptor.name,
        width: descriptor.width,
        height: descriptor.height,
        max_rlevel: descriptor.max_r_level,
        bands: descriptor.num_bands,
    })
}
