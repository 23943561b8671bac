//! Random-access raster source contract.

use pyramid_common::PixelRect;
use std::sync::Arc;

use crate::{Raster, RasterError, Result};

/// A raster that can be read one rectangle at a time.
///
/// Implementations must be safe to read from several worker threads at
/// once; tile tasks of one level all read the same source concurrently.
pub trait RasterSource: Send + Sync {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn band_count(&self) -> u32;

    fn bits_per_sample(&self) -> u8;

    /// Read every band of `rect`. The rectangle must lie inside the source.
    fn read(&self, rect: PixelRect) -> Result<Raster>;

    fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width(), self.height())
    }
}

/// Reject empty or out-of-range read requests.
pub fn check_read(source: &dyn RasterSource, rect: &PixelRect) -> Result<()> {
    let bounds = source.bounds();
    if rect.is_empty() || !bounds.contains(rect) {
        return Err(RasterError::OutOfBounds {
            requested: *rect,
            bounds,
        });
    }
    Ok(())
}

impl RasterSource for Raster {
    fn width(&self) -> u32 {
        Raster::width(self)
    }

    fn height(&self) -> u32 {
        Raster::height(self)
    }

    fn band_count(&self) -> u32 {
        Raster::band_count(self)
    }

    fn bits_per_sample(&self) -> u8 {
        Raster::bits_per_sample(self)
    }

    fn read(&self, rect: PixelRect) -> Result<Raster> {
        self.crop(rect)
    }
}

impl<T: RasterSource + ?Sized> RasterSource for Arc<T> {
    fn width(&self) -> u32 {
        (**self).width()
    }

    fn height(&self) -> u32 {
        (**self).height()
    }

    fn band_count(&self) -> u32 {
        (**self).band_count()
    }

    fn bits_per_sample(&self) -> u8 {
        (**self).bits_per_sample()
    }

    fn read(&self, rect: PixelRect) -> Result<Raster> {
        (**self).read(rect)
    }
}

impl<T: RasterSource + ?Sized> RasterSource for Box<T> {
    fn width(&self) -> u32 {
        (**self).width()
    }

    fn height(&self) -> u32 {
        (**self).height()
    }

    fn band_count(&self) -> u32 {
        (**self).band_count()
    }

    fn bits_per_sample(&self) -> u8 {
        (**self).bits_per_sample()
    }

    fn read(&self, rect: PixelRect) -> Result<Raster> {
        (**self).read(rect)
    }
}
