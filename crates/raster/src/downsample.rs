//! 2x reduction used to derive each coarser r-level.
//!
//! The output of a reduction is `ceil(w / 2) x ceil(h / 2)`. Input is read
//! from the source in horizontal strips so a reduction never needs the
//! whole finer level resident at once.

use pyramid_common::PixelRect;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::raster::max_sample_value;
use crate::{Raster, RasterSource, Result};

/// Output rows produced per source read.
pub const DEFAULT_STRIP_ROWS: u32 = 256;

/// Filter used to reduce a level by a factor of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleMethod {
    /// Average of the 2x2 block
    #[default]
    Mean,
    /// Maximum of the 2x2 block
    Max,
    /// Top-left sample of the 2x2 block
    Nearest,
    /// Separable Catmull-Rom evaluated between the two centre samples
    Bicubic,
}

impl DownsampleMethod {
    /// Extra source rows needed above and below each strip.
    fn halo(&self) -> u32 {
        match self {
            DownsampleMethod::Bicubic => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for DownsampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownsampleMethod::Mean => "mean",
            DownsampleMethod::Max => "max",
            DownsampleMethod::Nearest => "nearest",
            DownsampleMethod::Bicubic => "bicubic",
        };
        f.write_str(name)
    }
}

impl FromStr for DownsampleMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mean" | "average" | "box" => Ok(DownsampleMethod::Mean),
            "max" => Ok(DownsampleMethod::Max),
            "nearest" => Ok(DownsampleMethod::Nearest),
            "bicubic" | "cubic" => Ok(DownsampleMethod::Bicubic),
            other => Err(format!("unknown downsample method: {}", other)),
        }
    }
}

/// Reduce `source` by a factor of two in each dimension.
pub fn downsample_2x(
    source: &dyn RasterSource,
    method: DownsampleMethod,
    strip_rows: u32,
) -> Result<Raster> {
    let width = source.width();
    let height = source.height();
    let out_width = width.div_ceil(2);
    let out_height = height.div_ceil(2);
    let bands = source.band_count();
    let bits = source.bits_per_sample();
    let max_value = max_sample_value(bits);
    let halo = method.halo();
    let strip_rows = strip_rows.max(1);

    debug!(
        width,
        height, out_width, out_height, %method, "Reducing raster"
    );

    let mut out = Raster::new(out_width, out_height, bands, bits)?;
    let out_row_len = out_width as usize;

    let mut oy0 = 0;
    while oy0 < out_height {
        let oy1 = (oy0 + strip_rows).min(out_height);
        let in_y0 = (oy0 * 2).saturating_sub(halo);
        let in_y1 = (oy1 * 2 + halo).min(height);
        let window = source.read(PixelRect::new(0, in_y0, width, in_y1 - in_y0))?;
        let view = Window {
            width,
            y0: in_y0,
            y1: in_y1,
        };

        for band in 0..bands {
            let src = window.band(band)?;
            let dst = &mut out.band_mut(band)?
                [oy0 as usize * out_row_len..oy1 as usize * out_row_len];
            dst.par_chunks_mut(out_row_len)
                .enumerate()
                .for_each(|(i, row)| {
                    view.reduce_row(src, oy0 + i as u32, row, method, max_value);
                });
        }

        oy0 = oy1;
    }

    Ok(out)
}

/// Reduce an in-memory raster with the default strip height.
pub fn downsample_raster(raster: &Raster, method: DownsampleMethod) -> Result<Raster> {
    downsample_2x(raster, method, DEFAULT_STRIP_ROWS)
}

/// Rows `[y0, y1)` of a source level, full width.
#[derive(Clone, Copy)]
struct Window {
    width: u32,
    y0: u32,
    y1: u32,
}

impl Window {
    /// Sample with coordinates clamped to the window (and so to the level).
    #[inline]
    fn sample(&self, src: &[u16], x: i64, y: i64) -> u16 {
        let x = x.clamp(0, i64::from(self.width) - 1) as usize;
        let y = y.clamp(i64::from(self.y0), i64::from(self.y1) - 1) as usize - self.y0 as usize;
        src[y * self.width as usize + x]
    }

    fn reduce_row(
        &self,
        src: &[u16],
        out_y: u32,
        row: &mut [u16],
        method: DownsampleMethod,
        max_value: u16,
    ) {
        let sy = i64::from(out_y) * 2;
        for (ox, out) in row.iter_mut().enumerate() {
            let sx = ox as i64 * 2;
            *out = match method {
                DownsampleMethod::Nearest => self.sample(src, sx, sy),
                DownsampleMethod::Mean => {
                    let (sum, count) = self
                        .block(sx, sy)
                        .fold((0u32, 0u32), |(s, n), (x, y)| {
                            (s + u32::from(self.sample(src, x, y)), n + 1)
                        });
                    ((sum + count / 2) / count.max(1)) as u16
                }
                DownsampleMethod::Max => self
                    .block(sx, sy)
                    .map(|(x, y)| self.sample(src, x, y))
                    .max()
                    .unwrap_or(0),
                DownsampleMethod::Bicubic => {
                    let mut column = [0f32; 4];
                    for (k, dy) in (-1..=2).enumerate() {
                        let y = sy + dy;
                        column[k] = cubic_1d(
                            f32::from(self.sample(src, sx - 1, y)),
                            f32::from(self.sample(src, sx, y)),
                            f32::from(self.sample(src, sx + 1, y)),
                            f32::from(self.sample(src, sx + 2, y)),
                            0.5,
                        );
                    }
                    let v = cubic_1d(column[0], column[1], column[2], column[3], 0.5);
                    v.round().clamp(0.0, f32::from(max_value)) as u16
                }
            };
        }
    }

    /// In-bounds positions of the 2x2 block at (sx, sy).
    fn block(&self, sx: i64, sy: i64) -> impl Iterator<Item = (i64, i64)> + '_ {
        let width = i64::from(self.width);
        let bottom = i64::from(self.y1);
        [(sx, sy), (sx + 1, sy), (sx, sy + 1), (sx + 1, sy + 1)]
            .into_iter()
            .filter(move |&(x, y)| x < width && y < bottom)
    }
}

/// 1D cubic interpolation using Catmull-Rom spline.
fn cubic_1d(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_band(width: u32, height: u32, data: Vec<u16>) -> Raster {
        Raster::from_bands(width, height, 8, vec![data]).unwrap()
    }

    #[test]
    fn test_downsample_mean() {
        let r = single_band(4, 2, vec![1, 3, 10, 20, 5, 7, 30, 40]);
        let out = downsample_raster(&r, DownsampleMethod::Mean).unwrap();
        assert_eq!((out.width(), out.height()), (2, 1));
        assert_eq!(out.band(0).unwrap(), &[4, 25]);
    }

    #[test]
    fn test_downsample_max() {
        let r = single_band(4, 2, vec![1, 3, 10, 20, 5, 7, 30, 40]);
        let out = downsample_raster(&r, DownsampleMethod::Max).unwrap();
        assert_eq!(out.band(0).unwrap(), &[7, 40]);
    }

    #[test]
    fn test_downsample_nearest() {
        let r = single_band(4, 2, vec![1, 3, 10, 20, 5, 7, 30, 40]);
        let out = downsample_raster(&r, DownsampleMethod::Nearest).unwrap();
        assert_eq!(out.band(0).unwrap(), &[1, 10]);
    }

    #[test]
    fn test_odd_dimensions_round_up() {
        let r = single_band(3, 3, vec![10; 9]);
        let out = downsample_raster(&r, DownsampleMethod::Mean).unwrap();
        assert_eq!((out.width(), out.height()), (2, 2));
        // Edge blocks average only the samples that exist.
        assert!(out.band(0).unwrap().iter().all(|&v| v == 10));
    }

    #[test]
    fn test_single_pixel() {
        let r = single_band(1, 1, vec![9]);
        for method in [
            DownsampleMethod::Mean,
            DownsampleMethod::Max,
            DownsampleMethod::Nearest,
            DownsampleMethod::Bicubic,
        ] {
            let out = downsample_raster(&r, method).unwrap();
            assert_eq!(out.band(0).unwrap(), &[9]);
        }
    }

    #[test]
    fn test_bicubic_preserves_constant() {
        let r = single_band(9, 7, vec![200; 63]);
        let out = downsample_raster(&r, DownsampleMethod::Bicubic).unwrap();
        assert!(out.band(0).unwrap().iter().all(|&v| v == 200));
    }

    #[test]
    fn test_bicubic_clamps_overshoot() {
        // A hard edge makes Catmull-Rom overshoot past the sample range.
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&[0, 0, 255, 255, 255, 255, 0, 0]);
        }
        let r = single_band(8, 4, data);
        let out = downsample_raster(&r, DownsampleMethod::Bicubic).unwrap();
        assert!(out.band(0).unwrap().iter().all(|&v| v <= 255));
    }

    #[test]
    fn test_strip_size_does_not_change_result() {
        let data: Vec<u16> = (0..(37 * 23)).map(|i| (i * 7 % 251) as u16).collect();
        let r = single_band(37, 23, data);
        for method in [DownsampleMethod::Mean, DownsampleMethod::Bicubic] {
            let whole = downsample_2x(&r, method, 1024).unwrap();
            let strips = downsample_2x(&r, method, 3).unwrap();
            assert_eq!(whole, strips, "method={}", method);
        }
    }

    #[test]
    fn test_bands_reduced_independently() {
        let r = Raster::from_bands(2, 2, 16, vec![vec![100; 4], vec![4000; 4]]).unwrap();
        let out = downsample_raster(&r, DownsampleMethod::Mean).unwrap();
        assert_eq!(out.band(0).unwrap(), &[100]);
        assert_eq!(out.band(1).unwrap(), &[4000]);
        assert_eq!(out.bits_per_sample(), 16);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("Bicubic".parse::<DownsampleMethod>(), Ok(DownsampleMethod::Bicubic));
        assert_eq!("box".parse::<DownsampleMethod>(), Ok(DownsampleMethod::Mean));
        assert!("lanczos".parse::<DownsampleMethod>().is_err());
        assert_eq!(DownsampleMethod::default(), DownsampleMethod::Mean);
    }
}
