//! Publishes every tile of one level through the worker pool.

use metrics::counter;
use pyramid_common::{ImageKey, LevelShape, TileAddress};
use raster::RasterSource;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{MrfTileRef, TileSink, TileWriteOutcome};
use tracing::{debug, instrument, warn};

use crate::index::IndexBuilder;
use crate::pool::{LevelBarrier, WorkerPool};
use crate::report::{FailedTile, LevelReport};
use crate::work::{LevelWork, TileWork};
use crate::{IngestionError, Result};

/// Slices level rasters into tiles and hands them to the sink.
///
/// Each tile region is one pool task that publishes all of its bands. A
/// failing region never affects its siblings; the level completes once
/// every region has either published or failed.
pub struct TileSlicer {
    pool: Arc<WorkerPool>,
    sink: Arc<dyn TileSink>,
    level_timeout: Option<Duration>,
}

impl TileSlicer {
    pub fn new(pool: Arc<WorkerPool>, sink: Arc<dyn TileSink>, level_timeout: Option<Duration>) -> Self {
        Self {
            pool,
            sink,
            level_timeout,
        }
    }

    /// Every tile region of `shape`, row-major, placed by `work`'s offset.
    pub fn plan_level(work: &LevelWork, shape: &LevelShape, bands: u32) -> Vec<TileWork> {
        let mut tiles = Vec::with_capacity(shape.tile_count() as usize);
        for row in 0..shape.rows {
            for col in 0..shape.cols {
                if let Some(rect) = shape.tile_rect(col, row) {
                    tiles.push(TileWork {
                        part: work.part,
                        address: work.address(col, row, 0),
                        rect,
                        bands,
                    });
                }
            }
        }
        tiles
    }

    /// Publish one level and block until every region has finished.
    #[instrument(skip_all, fields(image = %key, level = work.level, part = work.part))]
    pub fn publish_level(
        &self,
        key: &ImageKey,
        source: Arc<dyn RasterSource>,
        work: &LevelWork,
        shape: &LevelShape,
        index: &IndexBuilder,
    ) -> Result<LevelReport> {
        let start = Instant::now();
        let tiles = Self::plan_level(work, shape, source.band_count());
        let barrier = LevelBarrier::new(tiles.len());
        let (tx, rx) = mpsc::channel::<Vec<(TileAddress, TileWriteOutcome)>>();

        debug!(
            regions = tiles.len(),
            cols = shape.cols,
            rows = shape.rows,
            "Submitting level"
        );

        for tile in tiles {
            let guard = barrier.guard();
            let tx = tx.clone();
            let sink = Arc::clone(&self.sink);
            let source = Arc::clone(&source);
            let index = index.clone();
            let key = key.clone();

            self.pool.submit(move || {
                let _guard = guard;
                let outcomes = catch_unwind(AssertUnwindSafe(|| {
                    publish_region(sink.as_ref(), &key, source.as_ref(), &tile, &index)
                }))
                .unwrap_or_else(|panic| {
                    let reason = format!("tile task panicked: {}", panic_message(&*panic));
                    fail_region(&tile, &reason)
                });
                let _ = tx.send(outcomes);
            });
        }
        drop(tx);

        match self.level_timeout {
            Some(timeout) => {
                if !barrier.wait_timeout(timeout) {
                    return Err(IngestionError::LevelTimedOut {
                        level: work.level,
                        remaining: barrier.remaining(),
                    });
                }
            }
            None => barrier.wait(),
        }

        let mut report = LevelReport::new(work.level, work.part);
        for (address, outcome) in rx.try_iter().flatten() {
            match outcome {
                TileWriteOutcome::Written { bytes } => {
                    report.tiles_published += 1;
                    report.bytes_written += bytes;
                }
                TileWriteOutcome::Failed { reason } => {
                    warn!(
                        rlevel = address.rlevel,
                        col = address.col,
                        row = address.row,
                        band = address.band,
                        reason = %reason,
                        "Tile not published"
                    );
                    report.failed.push(FailedTile { address, reason });
                }
            }
        }
        report.failed.sort_by(|a, b| a.address.cmp(&b.address));

        counter!("pyramid_tiles_published_total").increment(report.tiles_published);
        counter!("pyramid_tiles_failed_total").increment(report.failed.len() as u64);
        counter!("pyramid_levels_completed_total").increment(1);

        debug!(
            published = report.tiles_published,
            failed = report.failed.len(),
            bytes = report.bytes_written,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Level published"
        );
        Ok(report)
    }
}

/// Read one region and publish each band, recording successful writes.
///
/// A read failure fails every band of the region; anything after the read
/// is isolated per band.
fn publish_region(
    sink: &dyn TileSink,
    key: &ImageKey,
    source: &dyn RasterSource,
    tile: &TileWork,
    index: &IndexBuilder,
) -> Vec<(TileAddress, TileWriteOutcome)> {
    let region = match source.read(tile.rect) {
        Ok(region) => region,
        Err(e) => return fail_region(tile, &format!("read failed: {}", e)),
    };
    let bounds = region.bounds();

    (0..tile.bands)
        .map(|band| {
            let address = tile.band_address(band);
            // A panic costs only this band; siblings keep their outcomes.
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                match region.extract_tile(bounds, band) {
                    Ok(image) => sink.handle_tile(key, address, &image),
                    Err(e) => TileWriteOutcome::failed(format!("extract failed: {}", e)),
                }
            }))
            .unwrap_or_else(|panic| {
                let reason = format!("tile task panicked: {}", panic_message(&*panic));
                TileWriteOutcome::failed(reason)
            });
            if let TileWriteOutcome::Written { bytes } = outcome {
                index.record(MrfTileRef::new(key, address, bytes));
            }
            (address, outcome)
        })
        .collect()
}

fn fail_region(tile: &TileWork, reason: &str) -> Vec<(TileAddress, TileWriteOutcome)> {
    (0..tile.bands)
        .map(|band| (tile.band_address(band), TileWriteOutcome::failed(reason)))
        .collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
