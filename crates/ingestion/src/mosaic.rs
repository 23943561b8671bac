//! Multi-part mosaic assembly.
//!
//! Each part is a whole raster placed on a part grid. Parts are pyramided
//! independently, in sequence, with tile addresses shifted onto the
//! mosaic's global grid. A part can only contribute to levels it can
//! reach on its own, so the coarsest level every part reached is reported
//! as `last_rset_processed`; anything above it needs a reduction pass over
//! the published tiles.

use pyramid_common::{ImageKey, LevelPlan, TilePyramidDescriptor};
use raster::{
    decode_file, probe_dimensions, CachedRasterSource, CameraModel, FourCornerCameraModel,
    RasterSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use storage::TileSink;
use tracing::{info, instrument, warn};

use crate::builder::{source_id, validate_source, PyramidBuilder};
use crate::config::PyramidConfig;
use crate::index::IndexBuilder;
use crate::manifest::{MosaicManifest, PartSpec};
use crate::report::{last_rset_processed, MosaicReport, PartReport, SkippedPart};
use crate::work::LevelWork;
use crate::{IngestionError, Result};

/// Resolves manifest parts to rasters.
pub trait PartAccessor: Send + Sync {
    /// Pixel size of a part without decoding it.
    fn dimensions(&self, part: &PartSpec) -> raster::Result<(u32, u32)>;

    fn open(&self, part: &PartSpec) -> raster::Result<Arc<dyn RasterSource>>;
}

/// Parts stored as image files next to each other in one directory.
#[derive(Debug, Clone)]
pub struct FileSystemPartAccessor {
    base_dir: PathBuf,
}

impl FileSystemPartAccessor {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path_for(&self, part: &PartSpec) -> PathBuf {
        self.base_dir.join(&part.file)
    }
}

impl PartAccessor for FileSystemPartAccessor {
    fn dimensions(&self, part: &PartSpec) -> raster::Result<(u32, u32)> {
        probe_dimensions(&self.path_for(part))
    }

    fn open(&self, part: &PartSpec) -> raster::Result<Arc<dyn RasterSource>> {
        Ok(Arc::new(decode_file(&self.path_for(part))?))
    }
}

/// A part that passed probing, with its index in the manifest.
struct PlacedPart<'a> {
    index: usize,
    spec: &'a PartSpec,
}

pub struct MosaicAssembler {
    builder: PyramidBuilder,
}

impl MosaicAssembler {
    pub fn new(config: PyramidConfig, sink: Arc<dyn TileSink>) -> Result<Self> {
        Ok(Self::from_builder(PyramidBuilder::new(config, sink)?))
    }

    /// Share a builder's sink, pool and cache.
    pub fn from_builder(builder: PyramidBuilder) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &PyramidBuilder {
        &self.builder
    }

    /// Publish the mosaic described by `manifest`.
    ///
    /// Layout problems fail before anything is published. Parts that
    /// cannot be read are skipped and reported.
    #[instrument(skip_all, fields(product = %manifest.product_id, parts = manifest.parts.len()))]
    pub fn assemble(
        &self,
        manifest: &MosaicManifest,
        accessor: &dyn PartAccessor,
    ) -> Result<MosaicReport> {
        let start = Instant::now();
        let config = self.builder.config();
        let tile_size = config.tile_size;
        manifest.validate(tile_size)?;
        let key = manifest.image_key()?;

        let mut skipped = Vec::new();
        let mut placed = Vec::new();
        for (index, spec) in manifest.parts.iter().enumerate() {
            match accessor.dimensions(spec) {
                Ok((width, height)) => {
                    check_part_size(manifest, spec, width, height, tile_size)?;
                    placed.push(PlacedPart { index, spec });
                }
                Err(e) => {
                    warn!(part = %spec.file, error = %e, "Unable to read part, skipping");
                    skipped.push(SkippedPart {
                        name: spec.file.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if placed.is_empty() {
            return Err(IngestionError::NoUsableParts);
        }

        self.publish_metadata(&key, manifest)?;
        if config.metadata_only {
            return Ok(MosaicReport {
                image: key,
                parts: Vec::new(),
                skipped,
                last_rset_processed: None,
                index_entries: 0,
            });
        }

        let index = IndexBuilder::new();
        let (tiles_x, tiles_y) = manifest.tiles_per_part(tile_size);
        let mut parts = Vec::with_capacity(placed.len());
        for part in placed {
            match self.build_part(&key, &part, accessor, &index, tiles_x, tiles_y) {
                Ok(report) => parts.push(report),
                Err(e) => {
                    warn!(part = %part.spec.file, error = %e, "Part failed, skipping");
                    skipped.push(SkippedPart {
                        name: part.spec.file.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if parts.is_empty() {
            return Err(IngestionError::NoUsableParts);
        }

        let last_rset = last_rset_processed(&parts);
        let published = index.publish(self.builder.sink().as_ref(), &key)?;

        info!(
            image = %key,
            completed = parts.len(),
            skipped = skipped.len(),
            last_rset_processed = ?last_rset,
            tiles = published.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Mosaic published"
        );

        Ok(MosaicReport {
            image: key,
            parts,
            skipped,
            last_rset_processed: last_rset,
            index_entries: published.len(),
        })
    }

    /// Descriptor for the whole mosaic, from the manifest rather than any part.
    fn publish_metadata(&self, key: &ImageKey, manifest: &MosaicManifest) -> Result<()> {
        let plan = LevelPlan::new(manifest.width, manifest.height, self.builder.config().tile_size)
            .map_err(|e| IngestionError::UnsupportedLayout(e.to_string()))?;
        let camera = FourCornerCameraModel::new(manifest.corners, manifest.width, manifest.height)
            .map_err(|e| IngestionError::Metadata(e.to_string()))?;
        let footprint = camera
            .footprint(manifest.width, manifest.height)
            .map_err(|e| IngestionError::Metadata(e.to_string()))?;
        let descriptor = TilePyramidDescriptor::new(
            key.name(":"),
            &plan,
            manifest.num_bands(),
            footprint,
            manifest.metadata(),
        );
        self.builder.publish_metadata(key, &descriptor)
    }

    #[instrument(skip_all, fields(part = %part.spec.file, row = part.spec.row, col = part.spec.col))]
    fn build_part(
        &self,
        key: &ImageKey,
        part: &PlacedPart<'_>,
        accessor: &dyn PartAccessor,
        index: &IndexBuilder,
        tiles_x: u32,
        tiles_y: u32,
    ) -> Result<PartReport> {
        let config = self.builder.config();
        let source = accessor
            .open(part.spec)
            .map_err(|e| IngestionError::Decode(format!("{}: {}", part.spec.file, e)))?;
        let plan = validate_source(source.as_ref(), config.tile_size)?;

        let cached = Arc::new(CachedRasterSource::new(
            source,
            Arc::clone(self.builder.cache()),
            source_id(&format!("{}/{}", key.name(":"), part.spec.file)),
            config.tile_size,
        ));
        let (row, col) = (part.spec.row, part.spec.col);
        let result = self.builder.publish_levels(key, cached.clone(), &plan, index, |level| {
            LevelWork::for_part(part.index, level, row, col, tiles_x, tiles_y)
        });
        cached.flush();
        let levels = result?;

        info!(reached_level = plan.max_rlevel, "Part published");
        Ok(PartReport {
            name: part.spec.file.clone(),
            row,
            col,
            reached_level: plan.max_rlevel,
            levels,
        })
    }
}

/// Parts must tile exactly and fit inside their nominal cell.
fn check_part_size(
    manifest: &MosaicManifest,
    spec: &PartSpec,
    width: u32,
    height: u32,
    tile_size: u32,
) -> Result<()> {
    if width == 0 || height == 0 || width % tile_size != 0 || height % tile_size != 0 {
        return Err(IngestionError::UnsupportedLayout(format!(
            "part {} is {}x{}, not a multiple of tile size {}",
            spec.file, width, height, tile_size
        )));
    }
    if width > manifest.part_width || height > manifest.part_height {
        return Err(IngestionError::UnsupportedLayout(format!(
            "part {} is {}x{}, larger than the nominal {}x{}",
            spec.file, width, height, manifest.part_width, manifest.part_height
        )));
    }
    Ok(())
}
