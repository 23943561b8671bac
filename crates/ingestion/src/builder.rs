//! Single-source pyramid builder.
//!
//! A build walks `Decoded → MetadataPublished → Leveling* → IndexFinalized`.
//! Layout problems fail the build before the descriptor is written;
//! tile-level failures are collected and never stop the build.

use pyramid_common::{ImageKey, LevelPlan, TilePyramidDescriptor};
use raster::{
    cache_budget, decode_file, downsample_2x, shared_cache, CachedRasterSource, CameraModel,
    RasterSource, SharedBlockCache,
};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use storage::TileSink;
use tracing::{debug, info, instrument};

use crate::config::PyramidConfig;
use crate::index::IndexBuilder;
use crate::pool::WorkerPool;
use crate::report::{BuildReport, LevelReport};
use crate::slicer::TileSlicer;
use crate::work::LevelWork;
use crate::{IngestionError, Result};

/// Position of a build in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Decoded,
    MetadataPublished,
    Leveling { level: u32 },
    IndexFinalized,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Decoded => write!(f, "decoded"),
            BuildStage::MetadataPublished => write!(f, "metadata-published"),
            BuildStage::Leveling { level } => write!(f, "leveling({})", level),
            BuildStage::IndexFinalized => write!(f, "index-finalized"),
        }
    }
}

/// Check that `source` can be tiled and plan its levels.
pub fn validate_source(source: &dyn RasterSource, tile_size: u32) -> Result<LevelPlan> {
    let bits = source.bits_per_sample();
    if !(1..=16).contains(&bits) {
        return Err(IngestionError::UnsupportedLayout(format!(
            "{} bits per sample (1-16 supported)",
            bits
        )));
    }
    if source.band_count() == 0 {
        return Err(IngestionError::UnsupportedLayout("source has no bands".to_string()));
    }
    LevelPlan::new(source.width(), source.height(), tile_size)
        .map_err(|e| IngestionError::UnsupportedLayout(e.to_string()))
}

/// Decode a local raster file.
pub fn open_source(path: &Path) -> Result<Arc<dyn RasterSource>> {
    let raster = decode_file(path)
        .map_err(|e| IngestionError::Decode(format!("{}: {}", path.display(), e)))?;
    Ok(Arc::new(raster))
}

/// Stable block-cache id for a source.
pub(crate) fn source_id(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Builds pyramids for whole rasters against one sink.
///
/// The worker pool and block cache live as long as the builder and are
/// shared by every build it runs; the cache is flushed after each image.
pub struct PyramidBuilder {
    config: PyramidConfig,
    sink: Arc<dyn TileSink>,
    pool: Arc<WorkerPool>,
    cache: SharedBlockCache,
}

impl PyramidBuilder {
    pub fn new(config: PyramidConfig, sink: Arc<dyn TileSink>) -> Result<Self> {
        config.validate().map_err(IngestionError::InvalidConfig)?;
        let pool = Arc::new(WorkerPool::new(config.worker_threads)?);
        let cache = shared_cache(cache_budget(config.cache_memory_fraction));
        info!(
            tile_size = config.tile_size,
            workers = pool.threads(),
            cache_limit_mb = cache_budget(config.cache_memory_fraction) / (1024 * 1024),
            method = %config.downsample_method,
            "Pyramid builder ready"
        );
        Ok(Self::with_shared(config, sink, pool, cache))
    }

    /// Builder over an existing pool and cache.
    pub fn with_shared(
        config: PyramidConfig,
        sink: Arc<dyn TileSink>,
        pool: Arc<WorkerPool>,
        cache: SharedBlockCache,
    ) -> Self {
        Self {
            config,
            sink,
            pool,
            cache,
        }
    }

    pub fn config(&self) -> &PyramidConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn TileSink> {
        &self.sink
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn cache(&self) -> &SharedBlockCache {
        &self.cache
    }

    /// Build and publish the full pyramid of `source`.
    pub fn build(
        &self,
        key: &ImageKey,
        source: Arc<dyn RasterSource>,
        camera: &dyn CameraModel,
        metadata: serde_json::Value,
    ) -> Result<BuildReport> {
        self.run(key, source, camera, metadata, self.config.metadata_only)
    }

    /// Publish only the descriptor, regardless of configuration.
    pub fn build_metadata_only(
        &self,
        key: &ImageKey,
        source: Arc<dyn RasterSource>,
        camera: &dyn CameraModel,
        metadata: serde_json::Value,
    ) -> Result<BuildReport> {
        self.run(key, source, camera, metadata, true)
    }

    #[instrument(skip_all, fields(image = %key))]
    fn run(
        &self,
        key: &ImageKey,
        source: Arc<dyn RasterSource>,
        camera: &dyn CameraModel,
        metadata: serde_json::Value,
        metadata_only: bool,
    ) -> Result<BuildReport> {
        let start = Instant::now();
        let plan = validate_source(source.as_ref(), self.config.tile_size)?;
        let bands = source.band_count();
        debug!(stage = %BuildStage::Decoded, width = plan.width, height = plan.height, bands);

        let footprint = camera
            .footprint(plan.width, plan.height)
            .map_err(|e| IngestionError::Metadata(e.to_string()))?;
        let descriptor =
            TilePyramidDescriptor::new(key.name(":"), &plan, bands, footprint, metadata);
        self.publish_metadata(key, &descriptor)?;

        if metadata_only {
            info!(max_rlevel = plan.max_rlevel, "Metadata-only build complete");
            return Ok(BuildReport {
                image: key.clone(),
                max_rlevel: plan.max_rlevel,
                metadata_only: true,
                levels: Vec::new(),
                index_entries: 0,
            });
        }

        let index = IndexBuilder::new();
        let cached = Arc::new(CachedRasterSource::new(
            source,
            Arc::clone(&self.cache),
            source_id(&key.name(":")),
            self.config.tile_size,
        ));
        let result = self.publish_levels(key, cached.clone(), &plan, &index, LevelWork::single);
        cached.flush();
        let levels = result?;

        let published = index.publish(self.sink.as_ref(), key)?;
        debug!(stage = %BuildStage::IndexFinalized);

        let report = BuildReport {
            image: key.clone(),
            max_rlevel: plan.max_rlevel,
            metadata_only: false,
            levels,
            index_entries: published.len(),
        };
        info!(
            max_rlevel = plan.max_rlevel,
            tiles = report.tiles_published(),
            failed = report.failed_tiles().count(),
            bytes = report.bytes_written(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pyramid published"
        );
        Ok(report)
    }

    pub(crate) fn publish_metadata(
        &self,
        key: &ImageKey,
        descriptor: &TilePyramidDescriptor,
    ) -> Result<()> {
        self.sink
            .handle_metadata(key, descriptor)
            .map_err(|e| IngestionError::Metadata(e.to_string()))?;
        debug!(stage = %BuildStage::MetadataPublished, identifier = %descriptor.identifier);
        Ok(())
    }

    /// Publish every level of `plan`, deriving each from the one before.
    ///
    /// Levels run strictly in order; a level's raster is only reduced after
    /// all of its tiles finished, and is dropped once the next exists.
    pub(crate) fn publish_levels<F>(
        &self,
        key: &ImageKey,
        level0: Arc<dyn RasterSource>,
        plan: &LevelPlan,
        index: &IndexBuilder,
        work_for: F,
    ) -> Result<Vec<LevelReport>>
    where
        F: Fn(u32) -> LevelWork,
    {
        let slicer = TileSlicer::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.sink),
            self.config.level_timeout(),
        );
        let mut current = level0;
        let mut reports = Vec::with_capacity(plan.level_count() as usize);

        for shape in plan.levels() {
            debug!(stage = %BuildStage::Leveling { level: shape.level }, width = shape.width, height = shape.height);
            let work = work_for(shape.level);
            reports.push(slicer.publish_level(key, Arc::clone(&current), &work, &shape, index)?);

            if let Some(next) = plan.level(shape.level + 1) {
                let reduced = downsample_2x(
                    current.as_ref(),
                    self.config.downsample_method,
                    self.config.strip_rows,
                )?;
                if (reduced.width(), reduced.height()) != (next.width, next.height) {
                    return Err(IngestionError::UnsupportedLayout(format!(
                        "level {} reduced to {}x{}, expected {}x{}",
                        next.level,
                        reduced.width(),
                        reduced.height(),
                        next.width,
                        next.height
                    )));
                }
                current = Arc::new(reduced);
            }
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raster::Raster;

    #[test]
    fn test_validate_source_plans_levels() {
        let raster = Raster::new(1536, 1025, 1, 8).unwrap();
        let plan = validate_source(&raster, 512).unwrap();
        assert_eq!(plan.max_rlevel, 2);
    }

    #[test]
    fn test_validate_source_rejects_empty() {
        let raster = Raster::new(1, 1, 1, 8).unwrap();
        assert!(matches!(
            validate_source(&raster, 0),
            Err(IngestionError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(BuildStage::Leveling { level: 3 }.to_string(), "leveling(3)");
    }

    #[test]
    fn test_source_id_is_stable() {
        assert_eq!(source_id("a:b"), source_id("a:b"));
        assert_ne!(source_id("a:b"), source_id("a:c"));
    }
}
