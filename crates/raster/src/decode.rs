//! Decoding common image containers into rasters.

use image::DynamicImage;
use std::path::Path;
use tracing::debug;

use crate::{Raster, RasterError, Result};

/// Decode an image file into a raster.
///
/// Gray images become one band, RGB three and RGBA four. 8-bit formats keep
/// 8 bits per sample; everything else is widened to 16.
pub fn decode_file(path: &Path) -> Result<Raster> {
    let image = image::open(path)
        .map_err(|e| RasterError::decode(format!("{}: {}", path.display(), e)))?;
    let raster = from_dynamic(image)?;
    debug!(
        path = %path.display(),
        width = raster.width(),
        height = raster.height(),
        bands = raster.band_count(),
        bits = raster.bits_per_sample(),
        "Decoded image"
    );
    Ok(raster)
}

/// Decode an in-memory image container.
pub fn decode_bytes(bytes: &[u8]) -> Result<Raster> {
    let image = image::load_from_memory(bytes).map_err(|e| RasterError::decode(e.to_string()))?;
    from_dynamic(image)
}

/// Read only the header of an image file: (width, height).
pub fn probe_dimensions(path: &Path) -> Result<(u32, u32)> {
    image::image_dimensions(path)
        .map_err(|e| RasterError::decode(format!("{}: {}", path.display(), e)))
}

fn widen(samples: &[u8]) -> Vec<u16> {
    samples.iter().map(|&v| u16::from(v)).collect()
}

fn from_dynamic(image: DynamicImage) -> Result<Raster> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(RasterError::decode("image has no pixels"));
    }
    match image {
        DynamicImage::ImageLuma8(buf) => {
            Raster::from_interleaved(width, height, 1, 8, &widen(buf.as_raw()))
        }
        DynamicImage::ImageLumaA8(buf) => {
            Raster::from_interleaved(width, height, 2, 8, &widen(buf.as_raw()))
        }
        DynamicImage::ImageRgb8(buf) => {
            Raster::from_interleaved(width, height, 3, 8, &widen(buf.as_raw()))
        }
        DynamicImage::ImageRgba8(buf) => {
            Raster::from_interleaved(width, height, 4, 8, &widen(buf.as_raw()))
        }
        DynamicImage::ImageLuma16(buf) => Raster::from_interleaved(width, height, 1, 16, buf.as_raw()),
        DynamicImage::ImageLumaA16(buf) => {
            Raster::from_interleaved(width, height, 2, 16, buf.as_raw())
        }
        DynamicImage::ImageRgb16(buf) => Raster::from_interleaved(width, height, 3, 16, buf.as_raw()),
        DynamicImage::ImageRgba16(buf) => {
            Raster::from_interleaved(width, height, 4, 16, buf.as_raw())
        }
        other => {
            let buf = other.to_rgba16();
            Raster::from_interleaved(width, height, 4, 16, buf.as_raw())
        }
    }
}
