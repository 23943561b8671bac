//! End-to-end sink behaviour against both backends.

use chrono::{TimeZone, Utc};
use object_store::memory::InMemory;
use pyramid_common::{GeoPoint, GeoPolygon, ImageKey, LevelPlan, TileAddress, TilePyramidDescriptor};
use raster::TileImage;
use std::sync::Arc;
use storage::{
    BlobStore, FileSystemSink, FileSystemStore, MrfIndexFile, MrfTileRef, ObjectStoreBlobs,
    PyramidLayout, PyramidSink, StorageError, TileSink, TileWriteOutcome,
};

fn key() -> ImageKey {
    ImageKey::new(
        "SCENE",
        Utc.with_ymd_and_hms(2022, 8, 9, 10, 11, 12).unwrap(),
        Utc::now(),
    )
    .unwrap()
}

fn descriptor(plan: &LevelPlan, bands: u32) -> TilePyramidDescriptor {
    let bounds = GeoPolygon::from_corners([
        GeoPoint::new(0.0, 1.0),
        GeoPoint::new(1.0, 1.0),
        GeoPoint::new(1.0, 0.0),
        GeoPoint::new(0.0, 0.0),
    ])
    .unwrap();
    TilePyramidDescriptor::new(key().name(":"), plan, bands, bounds, serde_json::json!({}))
}

fn tile(value: u16) -> TileImage {
    TileImage {
        width: 4,
        height: 2,
        bits_per_sample: 8,
        samples: vec![value; 8],
    }
}

/// Publish every tile of `plan` and the resulting index.
fn publish_all<S: TileSink>(sink: &S, plan: &LevelPlan, bands: u32) -> MrfIndexFile {
    sink.handle_metadata(&key(), &descriptor(plan, bands)).unwrap();
    let mut refs = Vec::new();
    for shape in plan.levels() {
        for band in 0..bands {
            for row in 0..shape.rows {
                for col in 0..shape.cols {
                    let addr = TileAddress::new(shape.level, col, row, band);
                    match sink.handle_tile(&key(), addr, &tile(col as u16)) {
                        TileWriteOutcome::Written { bytes } => {
                            refs.push(MrfTileRef::new(&key(), addr, bytes))
                        }
                        TileWriteOutcome::Failed { reason } => panic!("write failed: {}", reason),
                    }
                }
            }
        }
    }
    let index = MrfIndexFile::new(refs);
    sink.handle_mrf(&key(), &index).unwrap();
    index
}

// ============================================================================
// Filesystem
// ============================================================================

#[test]
fn test_filesystem_layout_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSystemSink::new(FileSystemStore::new(dir.path()));
    let plan = LevelPlan::new(600, 100, 512).unwrap();
    publish_all(&sink, &plan, 1);

    let base = dir.path().join("SCENE").join("20220809101112");
    assert!(base.join("metadata.json").is_file());
    assert!(base.join("image.idx").is_file());
    assert!(base.join("0").join("1").join("0").join("0.png").is_file());
    assert!(base.join("1").join("0").join("0").join("0.png").is_file());
}

#[test]
fn test_filesystem_read_back_index_and_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSystemSink::new(FileSystemStore::new(dir.path()));
    let plan = LevelPlan::new(1100, 600, 512).unwrap();
    let published = publish_all(&sink, &plan, 2);

    let accessor = sink.accessor();
    assert!(accessor.exists(&key()).unwrap());
    assert_eq!(accessor.read_descriptor(&key()).unwrap().max_r_level, 2);
    assert_eq!(accessor.read_index(&key()).unwrap(), published);
    assert_eq!(accessor.crawl_index(&key()).unwrap(), published);

    let first = published.lookup(&TileAddress::new(0, 0, 0, 0)).unwrap();
    let png = accessor.read_tile(&key(), &TileAddress::new(0, 0, 0, 0)).unwrap();
    assert_eq!(png.len() as u64, first.size);
}

#[test]
fn test_filesystem_missing_pyramid() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSystemSink::new(FileSystemStore::new(dir.path()));
    assert!(!sink.accessor().exists(&key()).unwrap());
    assert!(matches!(
        sink.accessor().read_index(&key()),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn test_encoding_failure_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSystemSink::new(FileSystemStore::new(dir.path()));
    let bad = TileImage {
        width: 2,
        height: 2,
        bits_per_sample: 8,
        samples: vec![0; 3],
    };
    let outcome = sink.handle_tile(&key(), TileAddress::new(0, 0, 0, 0), &bad);
    assert!(matches!(outcome, TileWriteOutcome::Failed { .. }));
}

// ============================================================================
// Object store
// ============================================================================

#[test]
fn test_object_store_sink_with_prefix() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let memory = Arc::new(InMemory::new());
    let blobs = ObjectStoreBlobs::from_store(memory, rt.handle().clone(), "bucket");
    let sink = PyramidSink::with_layout(blobs, PyramidLayout::with_prefix("pyramids"));
    let plan = LevelPlan::new(700, 700, 512).unwrap();
    let published = publish_all(&sink, &plan, 1);

    let keys: Vec<String> = sink
        .store()
        .list("pyramids/SCENE/")
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert!(keys.contains(&"pyramids/SCENE/20220809101112/metadata.json".to_string()));
    assert!(keys.contains(&"pyramids/SCENE/20220809101112/0/1/1/0.png".to_string()));
    assert_eq!(sink.accessor().read_index(&key()).unwrap(), published);
    assert_eq!(sink.accessor().crawl_index(&key()).unwrap(), published);
}
