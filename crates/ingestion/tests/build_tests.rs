//! Single-source pyramid builds against recording and failing sinks.

use ingestion::{IngestionError, PyramidBuilder, PyramidConfig};
use pyramid_common::{LevelPlan, PixelRect, TileAddress};
use raster::{AffineCameraModel, Raster, RasterSource};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use storage::{FileSystemSink, FileSystemStore, TileSink};
use test_utils::{
    constant_raster, gradient_raster, test_key, FailingSink, RecordingSink, SinkEvent,
};

fn config() -> PyramidConfig {
    PyramidConfig {
        worker_threads: 2,
        ..PyramidConfig::default()
    }
}

fn camera() -> AffineCameraModel {
    AffineCameraModel::north_up(10.0, 50.0, 0.0001, 0.0001)
}

fn build(sink: Arc<dyn TileSink>, raster: Raster) -> ingestion::Result<ingestion::BuildReport> {
    let builder = PyramidBuilder::new(config(), sink)?;
    builder.build(&test_key(), Arc::new(raster), &camera(), serde_json::json!({}))
}

fn addresses_at(sink: &RecordingSink, level: u32) -> Vec<(u32, u32)> {
    sink.tile_addresses()
        .into_iter()
        .filter(|a| a.rlevel == level && a.band == 0)
        .map(|a| (a.col, a.row))
        .collect()
}

// ============================================================================
// Level planning and publication
// ============================================================================

#[test]
fn test_1536x1025_level_grids() {
    let sink = Arc::new(RecordingSink::new());
    let report = build(sink.clone(), gradient_raster(1536, 1025, 1, 8)).unwrap();

    assert_eq!(report.max_rlevel, 2);
    assert_eq!(report.levels.len(), 3);
    assert_eq!(addresses_at(&sink, 0).len(), 9);
    assert_eq!(addresses_at(&sink, 1), vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    assert_eq!(addresses_at(&sink, 2), vec![(0, 0)]);

    // 768x513 and 384x257 at levels 1 and 2
    let bottom = sink.tile(TileAddress::new(1, 0, 1, 0)).unwrap();
    assert_eq!((bottom.width, bottom.height), (512, 1));
    let top = sink.tile(TileAddress::new(2, 0, 0, 0)).unwrap();
    assert_eq!((top.width, top.height), (384, 257));
}

#[test]
fn test_edge_tiles_are_clipped() {
    let sink = Arc::new(RecordingSink::new());
    build(sink.clone(), gradient_raster(1536, 1025, 1, 8)).unwrap();
    let corner = sink.tile(TileAddress::new(0, 2, 2, 0)).unwrap();
    assert_eq!((corner.width, corner.height), (512, 1));
}

#[test]
fn test_small_image_has_single_partial_tile() {
    let sink = Arc::new(RecordingSink::new());
    let report = build(sink.clone(), gradient_raster(100, 40, 1, 8)).unwrap();
    assert_eq!(report.max_rlevel, 0);
    assert_eq!(sink.tile_count(), 1);
    let tile = sink.tile(TileAddress::new(0, 0, 0, 0)).unwrap();
    assert_eq!((tile.width, tile.height), (100, 40));
}

#[test]
fn test_index_is_complete_and_sorted() {
    let sink = Arc::new(RecordingSink::new());
    let report = build(sink.clone(), gradient_raster(1536, 1025, 2, 8)).unwrap();

    let plan = LevelPlan::new(1536, 1025, 512).unwrap();
    let index = sink.last_index().unwrap();
    assert!(report.is_complete());
    assert_eq!(index.len() as u64, plan.total_tiles(2));
    assert_eq!(report.index_entries as u64, plan.total_tiles(2));
    assert_eq!(report.tiles_published(), plan.total_tiles(2));

    let addrs: Vec<TileAddress> = index.tiles().iter().map(|t| t.address).collect();
    let mut sorted = addrs.clone();
    sorted.sort_by_key(|a| (a.rlevel, a.band, a.row, a.col));
    assert_eq!(addrs, sorted);
}

#[test]
fn test_metadata_precedes_tiles_and_index_is_last() {
    let sink = Arc::new(RecordingSink::new());
    build(sink.clone(), gradient_raster(600, 600, 1, 8)).unwrap();

    let events = sink.events();
    assert!(matches!(events.first(), Some(SinkEvent::Metadata(_))));
    assert!(matches!(events.last(), Some(SinkEvent::Index(_))));
    let descriptor = sink.last_descriptor().unwrap();
    assert_eq!(descriptor.max_r_level, 1);
    assert_eq!(descriptor.name, "TEST_COLLECTION:20200102030405");
}

#[test]
fn test_reduced_levels_keep_constant_value() {
    let sink = Arc::new(RecordingSink::new());
    build(sink.clone(), constant_raster(1024, 1024, 1, 8, 100)).unwrap();
    let top = sink.tile(TileAddress::new(1, 0, 0, 0)).unwrap();
    assert_eq!(top.checksum, 100 * 512 * 512);
}

#[test]
fn test_rebuild_is_idempotent() {
    let sink = Arc::new(RecordingSink::new());
    let builder = PyramidBuilder::new(config(), sink.clone()).unwrap();
    let raster: Arc<dyn RasterSource> = Arc::new(gradient_raster(1100, 700, 1, 8));

    builder
        .build(&test_key(), raster.clone(), &camera(), serde_json::json!({}))
        .unwrap();
    let first = sink.last_index().unwrap();
    builder
        .build(&test_key(), raster, &camera(), serde_json::json!({}))
        .unwrap();
    let second = sink.last_index().unwrap();

    let set = |i: &storage::MrfIndexFile| -> BTreeSet<TileAddress> {
        i.tiles().iter().map(|t| t.address).collect()
    };
    assert_eq!(first.len(), second.len());
    assert_eq!(set(&first), set(&second));
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_failed_tile_does_not_stop_later_levels() {
    let failing = TileAddress::new(1, 1, 0, 0);
    let sink = Arc::new(FailingSink::new(RecordingSink::new()).fail_tile(failing));
    let report = build(sink.clone(), gradient_raster(1536, 1025, 1, 8)).unwrap();

    let failed: Vec<TileAddress> = report.failed_tiles().map(|f| f.address).collect();
    assert_eq!(failed, vec![failing]);
    assert!(!report.is_complete());

    let recorded = sink.inner();
    assert!(recorded.tile(TileAddress::new(2, 0, 0, 0)).is_some());
    let index = recorded.last_index().unwrap();
    assert_eq!(index.len(), 13);
    assert!(index.tiles().iter().all(|t| t.address != failing));
}

#[test]
fn test_panicking_tile_is_reported() {
    let bad = TileAddress::new(0, 0, 0, 0);
    let sink = Arc::new(FailingSink::new(RecordingSink::new()).panic_on_tile(bad));
    let report = build(sink.clone(), gradient_raster(1024, 512, 1, 8)).unwrap();

    let failed: Vec<_> = report.failed_tiles().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].address, bad);
    assert!(failed[0].reason.contains("panicked"));
    assert!(sink.inner().last_index().is_some());
}

#[test]
fn test_panic_on_one_band_keeps_sibling_band() {
    let bad = TileAddress::new(0, 0, 0, 1);
    let sink = Arc::new(FailingSink::new(RecordingSink::new()).panic_on_tile(bad));
    let report = build(sink.clone(), gradient_raster(512, 512, 2, 8)).unwrap();

    let failed: Vec<TileAddress> = report.failed_tiles().map(|f| f.address).collect();
    assert_eq!(failed, vec![bad]);
    assert_eq!(report.tiles_published(), 1);

    let index = sink.inner().last_index().unwrap();
    let indexed: Vec<TileAddress> = index.tiles().iter().map(|t| t.address).collect();
    assert_eq!(indexed, vec![TileAddress::new(0, 0, 0, 0)]);
    assert!(indexed.iter().all(|a| !failed.contains(a)));
}

#[test]
fn test_level_timeout_fails_build_without_index() {
    let slow = TileAddress::new(0, 0, 0, 0);
    let sink = Arc::new(
        FailingSink::new(RecordingSink::new()).delay_tile(slow, Duration::from_secs(3)),
    );
    let builder = PyramidBuilder::new(
        PyramidConfig {
            level_timeout_secs: Some(1),
            ..config()
        },
        sink.clone(),
    )
    .unwrap();

    let err = builder
        .build(
            &test_key(),
            Arc::new(gradient_raster(1024, 512, 1, 8)),
            &camera(),
            serde_json::json!({}),
        )
        .unwrap_err();
    assert!(matches!(err, IngestionError::LevelTimedOut { level: 0, .. }));

    let recorded = sink.inner();
    assert!(recorded.last_descriptor().is_some());
    assert!(recorded.last_index().is_none());
    assert!(!recorded
        .events()
        .iter()
        .any(|e| matches!(e, SinkEvent::Index(_))));
}

#[test]
fn test_metadata_failure_is_fatal() {
    let sink = Arc::new(FailingSink::new(RecordingSink::new()).fail_metadata());
    let err = build(sink.clone(), gradient_raster(600, 600, 1, 8)).unwrap_err();
    assert!(matches!(err, IngestionError::Metadata(_)));
    assert_eq!(sink.inner().tile_count(), 0);
}

/// A source reporting a sample depth the pipeline does not handle.
struct ThirtyTwoBitSource;

impl RasterSource for ThirtyTwoBitSource {
    fn width(&self) -> u32 {
        512
    }
    fn height(&self) -> u32 {
        512
    }
    fn band_count(&self) -> u32 {
        1
    }
    fn bits_per_sample(&self) -> u8 {
        32
    }
    fn read(&self, _rect: PixelRect) -> raster::Result<Raster> {
        Err(raster::RasterError::unsupported("unreadable"))
    }
}

#[test]
fn test_unsupported_layout_fails_before_publication() {
    let sink = Arc::new(RecordingSink::new());
    let builder = PyramidBuilder::new(config(), sink.clone()).unwrap();
    let err = builder
        .build(&test_key(), Arc::new(ThirtyTwoBitSource), &camera(), serde_json::json!({}))
        .unwrap_err();
    assert!(matches!(err, IngestionError::UnsupportedLayout(_)));
    assert!(sink.events().is_empty());
}

#[test]
fn test_metadata_only_build() {
    let sink = Arc::new(RecordingSink::new());
    let builder = PyramidBuilder::new(
        PyramidConfig {
            metadata_only: true,
            ..config()
        },
        sink.clone(),
    )
    .unwrap();
    let report = builder
        .build(
            &test_key(),
            Arc::new(gradient_raster(2048, 2048, 1, 8)),
            &camera(),
            serde_json::json!({"origin": "test"}),
        )
        .unwrap();

    assert!(report.metadata_only);
    assert_eq!(report.max_rlevel, 2);
    assert_eq!(sink.events().len(), 1);
    assert_eq!(sink.last_descriptor().unwrap().metadata["origin"], "test");
}

#[test]
fn test_invalid_config_is_rejected() {
    let sink: Arc<dyn TileSink> = Arc::new(RecordingSink::new());
    let result = PyramidBuilder::new(
        PyramidConfig {
            tile_size: 0,
            ..config()
        },
        sink,
    );
    assert!(matches!(result, Err(IngestionError::InvalidConfig(_))));
}

// ============================================================================
// Filesystem end to end
// ============================================================================

#[test]
fn test_filesystem_build_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FileSystemSink::new(FileSystemStore::new(dir.path())));
    let report = build(sink.clone(), gradient_raster(600, 300, 3, 8)).unwrap();

    let base = dir.path().join("TEST_COLLECTION").join("20200102030405");
    assert!(base.join("metadata.json").is_file());
    assert!(base.join("image.idx").is_file());
    assert!(base.join("1").join("0").join("0").join("2.png").is_file());

    let accessor = sink.accessor();
    let index = accessor.read_index(&test_key()).unwrap();
    assert_eq!(index.len(), report.index_entries);
    assert_eq!(index.data_size(), report.bytes_written());
    assert_eq!(accessor.crawl_index(&test_key()).unwrap(), index);

    let descriptor = accessor.read_descriptor(&test_key()).unwrap();
    assert_eq!(descriptor.num_bands, 3);
    assert_eq!((descriptor.width, descriptor.height), (600, 300));
}
