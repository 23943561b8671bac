//! Reduction chains over cached sources.

use pyramid_common::{LevelPlan, PixelRect};
use raster::{
    downsample_2x, shared_cache, CachedRasterSource, DownsampleMethod, Raster, RasterSource,
};
use std::sync::Arc;

fn gradient(width: u32, height: u32) -> Raster {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x + y) % 256) as u16))
        .collect();
    Raster::from_bands(width, height, 8, vec![data]).unwrap()
}

// ============================================================================
// Level chain
// ============================================================================

#[test]
fn test_reduction_chain_matches_level_plan() {
    let plan = LevelPlan::new(1536, 1025, 512).unwrap();
    let mut current = gradient(1536, 1025);

    for shape in plan.levels().skip(1) {
        current = downsample_2x(&current, DownsampleMethod::Mean, 64).unwrap();
        assert_eq!((current.width(), current.height()), (shape.width, shape.height));
    }
    assert_eq!((current.width(), current.height()), (384, 257));
}

#[test]
fn test_reduction_through_cache_matches_direct() {
    let source = gradient(700, 301);
    let cached = CachedRasterSource::new(source.clone(), shared_cache(64 << 20), 9, 128);

    for method in [DownsampleMethod::Mean, DownsampleMethod::Bicubic] {
        let direct = downsample_2x(&source, method, 50).unwrap();
        let via_cache = downsample_2x(&cached, method, 50).unwrap();
        assert_eq!(direct, via_cache);
    }
}

#[test]
fn test_tiny_cache_still_reads_correctly() {
    let source = gradient(300, 300);
    let cache = shared_cache(1);
    let cached = CachedRasterSource::new(source.clone(), Arc::clone(&cache), 1, 64);

    let rect = PixelRect::new(10, 70, 200, 100);
    assert_eq!(cached.read(rect).unwrap(), source.crop(rect).unwrap());
    assert!(cache.lock().unwrap().is_empty());
}

#[test]
fn test_arc_source_delegates() {
    let source: Arc<dyn RasterSource> = Arc::new(gradient(5, 5));
    assert_eq!(source.width(), 5);
    let out = downsample_2x(&source, DownsampleMethod::Nearest, 1).unwrap();
    assert_eq!((out.width(), out.height()), (3, 3));
}
