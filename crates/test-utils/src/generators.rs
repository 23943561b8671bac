//! Synthetic rasters with predictable sample values.
//!
//! These generators create verifiable patterns so tests can check that
//! tiles land at the right address with the right content.

use raster::{max_sample_value, Raster};
use std::path::Path;

/// Creates a raster whose sample at (x, y) in band b is
/// `(x + y + 7 * b) % (max + 1)`.
///
/// # Example
///
/// ```
/// use test_utils::gradient_raster;
///
/// let r = gradient_raster(10, 5, 2, 8);
/// assert_eq!(r.get(3, 1, 0), 4);
/// assert_eq!(r.get(3, 1, 1), 11);
/// ```
pub fn gradient_raster(width: u32, height: u32, bands: u32, bits: u8) -> Raster {
    let modulus = u32::from(max_sample_value(bits)) + 1;
    let band_data = (0..bands)
        .map(|b| {
            let mut data = Vec::with_capacity(width as usize * height as usize);
            for y in 0..height {
                for x in 0..width {
                    data.push(((x + y + 7 * b) % modulus) as u16);
                }
            }
            data
        })
        .collect();
    Raster::from_bands(width, height, bits, band_data).expect("valid gradient raster")
}

/// Creates a raster with every sample set to `value`.
pub fn constant_raster(width: u32, height: u32, bands: u32, bits: u8, value: u16) -> Raster {
    let band_data = (0..bands)
        .map(|_| vec![value; width as usize * height as usize])
        .collect();
    Raster::from_bands(width, height, bits, band_data).expect("valid constant raster")
}

/// Creates a single-band 8-bit checkerboard of `cell`-sized squares (0 / 255).
pub fn checker_raster(width: u32, height: u32, cell: u32) -> Raster {
    let cell = cell.max(1);
    let mut data = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            data.push(if ((x / cell) + (y / cell)) % 2 == 0 { 0 } else { 255 });
        }
    }
    Raster::from_bands(width, height, 8, vec![data]).expect("valid checker raster")
}

/// Writes an 8-bit raster as a PNG (1 band gray, 3 bands RGB).
pub fn write_png(path: &Path, raster: &Raster) {
    let (w, h) = (raster.width(), raster.height());
    let mut interleaved = Vec::with_capacity((w * h * raster.band_count()) as usize);
    for y in 0..h {
        for x in 0..w {
            for b in 0..raster.band_count() {
                interleaved.push(raster.get(x, y, b) as u8);
            }
        }
    }
    let color = match raster.band_count() {
        1 => image::ColorType::L8,
        3 => image::ColorType::Rgb8,
        n => panic!("write_png supports 1 or 3 bands, got {}", n),
    };
    image::save_buffer(path, &interleaved, w, h, color).expect("write png");
}
