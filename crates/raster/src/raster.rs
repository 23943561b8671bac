//! In-memory multi-band raster and single-band tile images.

use pyramid_common::PixelRect;

use crate::{RasterError, Result};

/// Largest sample value representable with `bits_per_sample`.
pub fn max_sample_value(bits_per_sample: u8) -> u16 {
    if bits_per_sample >= 16 {
        u16::MAX
    } else {
        (1u16 << bits_per_sample) - 1
    }
}

fn check_bits(bits_per_sample: u8) -> Result<()> {
    match bits_per_sample {
        1..=16 => Ok(()),
        other => Err(RasterError::unsupported(format!(
            "{} bits per sample",
            other
        ))),
    }
}

/// Band-sequential raster of unsigned integer samples.
///
/// Samples of up to 16 bits are stored widened to `u16`; band `b` occupies
/// `data[b * w * h .. (b + 1) * w * h]` in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    band_count: u32,
    bits_per_sample: u8,
    data: Vec<u16>,
}

impl Raster {
    /// Zero-filled raster.
    pub fn new(width: u32, height: u32, band_count: u32, bits_per_sample: u8) -> Result<Self> {
        check_bits(bits_per_sample)?;
        if band_count == 0 {
            return Err(RasterError::unsupported("raster has no bands"));
        }
        let len = width as usize * height as usize * band_count as usize;
        Ok(Self {
            width,
            height,
            band_count,
            bits_per_sample,
            data: vec![0; len],
        })
    }

    /// Raster from one sample vector per band.
    pub fn from_bands(
        width: u32,
        height: u32,
        bits_per_sample: u8,
        bands: Vec<Vec<u16>>,
    ) -> Result<Self> {
        check_bits(bits_per_sample)?;
        if bands.is_empty() {
            return Err(RasterError::unsupported("raster has no bands"));
        }
        let plane = width as usize * height as usize;
        let mut data = Vec::with_capacity(plane * bands.len());
        for (i, band) in bands.iter().enumerate() {
            if band.len() != plane {
                return Err(RasterError::unsupported(format!(
                    "band {} has {} samples, expected {}",
                    i,
                    band.len(),
                    plane
                )));
            }
            data.extend_from_slice(band);
        }
        Ok(Self {
            width,
            height,
            band_count: bands.len() as u32,
            bits_per_sample,
            data,
        })
    }

    /// Raster from pixel-interleaved samples (`band_count` samples per pixel).
    pub fn from_interleaved(
        width: u32,
        height: u32,
        band_count: u32,
        bits_per_sample: u8,
        samples: &[u16],
    ) -> Result<Self> {
        let mut raster = Self::new(width, height, band_count, bits_per_sample)?;
        let plane = raster.plane_len();
        if samples.len() != plane * band_count as usize {
            return Err(RasterError::unsupported(format!(
                "{} interleaved samples for {}x{}x{}",
                samples.len(),
                width,
                height,
                band_count
            )));
        }
        let bands = band_count as usize;
        for (i, pixel) in samples.chunks_exact(bands).enumerate() {
            for (b, &v) in pixel.iter().enumerate() {
                raster.data[b * plane + i] = v;
            }
        }
        Ok(raster)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn band_count(&self) -> u32 {
        self.band_count
    }

    pub fn bits_per_sample(&self) -> u8 {
        self.bits_per_sample
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }

    fn plane_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<u16>()
    }

    pub fn band(&self, band: u32) -> Result<&[u16]> {
        self.check_band(band)?;
        let plane = self.plane_len();
        let start = band as usize * plane;
        Ok(&self.data[start..start + plane])
    }

    pub fn band_mut(&mut self, band: u32) -> Result<&mut [u16]> {
        self.check_band(band)?;
        let plane = self.plane_len();
        let start = band as usize * plane;
        Ok(&mut self.data[start..start + plane])
    }

    /// Every band plane, mutably.
    pub fn bands_mut(&mut self) -> std::slice::ChunksExactMut<'_, u16> {
        let plane = self.plane_len().max(1);
        self.data.chunks_exact_mut(plane)
    }

    /// Sample at (x, y) in `band`. Panics on out-of-range coordinates.
    #[inline]
    pub fn get(&self, x: u32, y: u32, band: u32) -> u16 {
        self.data[band as usize * self.plane_len() + y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, band: u32, value: u16) {
        let idx = band as usize * self.plane_len() + y as usize * self.width as usize + x as usize;
        self.data[idx] = value;
    }

    fn check_band(&self, band: u32) -> Result<()> {
        if band >= self.band_count {
            return Err(RasterError::BandOutOfRange {
                band,
                count: self.band_count,
            });
        }
        Ok(())
    }

    fn check_rect(&self, rect: &PixelRect) -> Result<()> {
        if rect.is_empty() || !self.bounds().contains(rect) {
            return Err(RasterError::OutOfBounds {
                requested: *rect,
                bounds: self.bounds(),
            });
        }
        Ok(())
    }

    /// Copy of `rect`, all bands.
    pub fn crop(&self, rect: PixelRect) -> Result<Raster> {
        self.check_rect(&rect)?;
        let mut out = Raster::new(rect.width, rect.height, self.band_count, self.bits_per_sample)?;
        out.paste(self, rect, 0, 0)?;
        Ok(out)
    }

    /// Copy `src_rect` of `src` into this raster with its top-left at (dx, dy).
    pub fn paste(&mut self, src: &Raster, src_rect: PixelRect, dx: u32, dy: u32) -> Result<()> {
        src.check_rect(&src_rect)?;
        self.check_rect(&PixelRect::new(dx, dy, src_rect.width, src_rect.height))?;
        if src.band_count != self.band_count {
            return Err(RasterError::unsupported(format!(
                "cannot paste {} bands into {} bands",
                src.band_count, self.band_count
            )));
        }
        let row_len = src_rect.width as usize;
        for band in 0..self.band_count {
            let src_plane = src.band(band)?;
            let dst_width = self.width as usize;
            let dst_plane = self.band_mut(band)?;
            for row in 0..src_rect.height as usize {
                let s = (src_rect.y as usize + row) * src.width as usize + src_rect.x as usize;
                let d = (dy as usize + row) * dst_width + dx as usize;
                dst_plane[d..d + row_len].copy_from_slice(&src_plane[s..s + row_len]);
            }
        }
        Ok(())
    }

    /// Single-band tile image of `rect` in `band`.
    pub fn extract_tile(&self, rect: PixelRect, band: u32) -> Result<TileImage> {
        self.check_rect(&rect)?;
        let plane = self.band(band)?;
        let mut samples = Vec::with_capacity(rect.area() as usize);
        for row in rect.y..rect.bottom() {
            let start = row as usize * self.width as usize + rect.x as usize;
            samples.extend_from_slice(&plane[start..start + rect.width as usize]);
        }
        Ok(TileImage {
            width: rect.width,
            height: rect.height,
            bits_per_sample: self.bits_per_sample,
            samples,
        })
    }
}

/// One band of one tile, ready for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u8,
    pub samples: Vec<u16>,
}

impl TileImage {
    /// Whether the tile needs a 16-bit encoding.
    pub fn is_wide(&self) -> bool {
        self.bits_per_sample > 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32, bands: u32) -> Raster {
        let plane = (width * height) as usize;
        let data = (0..bands)
            .map(|b| (0..plane).map(|i| (i as u16) + (b as u16) * 1000).collect())
            .collect();
        Raster::from_bands(width, height, 16, data).unwrap()
    }

    #[test]
    fn test_from_bands_validates_length() {
        assert!(Raster::from_bands(2, 2, 8, vec![vec![0; 3]]).is_err());
        assert!(Raster::from_bands(2, 2, 8, vec![]).is_err());
    }

    #[test]
    fn test_rejects_wide_samples() {
        assert!(Raster::new(1, 1, 1, 32).is_err());
        assert!(Raster::new(1, 1, 1, 0).is_err());
    }

    #[test]
    fn test_from_interleaved() {
        let r = Raster::from_interleaved(2, 1, 3, 8, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(r.band(0).unwrap(), &[1, 4]);
        assert_eq!(r.band(2).unwrap(), &[3, 6]);
    }

    #[test]
    fn test_crop() {
        let r = ramp(4, 4, 2);
        let c = r.crop(PixelRect::new(1, 2, 2, 2)).unwrap();
        assert_eq!(c.band(0).unwrap(), &[9, 10, 13, 14]);
        assert_eq!(c.band(1).unwrap(), &[1009, 1010, 1013, 1014]);
    }

    #[test]
    fn test_crop_out_of_bounds() {
        let r = ramp(4, 4, 1);
        assert!(matches!(
            r.crop(PixelRect::new(3, 3, 2, 1)),
            Err(RasterError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_extract_tile_edge() {
        let r = ramp(5, 3, 1);
        let t = r.extract_tile(PixelRect::new(4, 0, 1, 3), 0).unwrap();
        assert_eq!((t.width, t.height), (1, 3));
        assert_eq!(t.samples, vec![4, 9, 14]);
    }

    #[test]
    fn test_extract_tile_bad_band() {
        let r = ramp(2, 2, 1);
        assert!(matches!(
            r.extract_tile(PixelRect::new(0, 0, 1, 1), 1),
            Err(RasterError::BandOutOfRange { band: 1, count: 1 })
        ));
    }

    #[test]
    fn test_max_sample_value() {
        assert_eq!(max_sample_value(8), 255);
        assert_eq!(max_sample_value(11), 2047);
        assert_eq!(max_sample_value(16), u16::MAX);
    }
}
