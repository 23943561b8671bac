//! Image-to-world camera models.

use pyramid_common::{GeoPoint, GeoPolygon};
use serde::{Deserialize, Serialize};

use crate::{RasterError, Result};

/// Maps image pixel coordinates to geodetic positions.
pub trait CameraModel: Send + Sync {
    fn image_to_world(&self, x: f64, y: f64) -> Result<GeoPoint>;

    /// Footprint of a `width` x `height` image: corners (0,0), (w,0), (w,h), (0,h).
    fn footprint(&self, width: u32, height: u32) -> Result<GeoPolygon> {
        let (w, h) = (f64::from(width), f64::from(height));
        let corners = [
            self.image_to_world(0.0, 0.0)?,
            self.image_to_world(w, 0.0)?,
            self.image_to_world(w, h)?,
            self.image_to_world(0.0, h)?,
        ];
        Ok(GeoPolygon::from_corners(corners)?)
    }
}

/// Six-coefficient affine geotransform.
///
/// `lon = c[0] + x * c[1] + y * c[2]`, `lat = c[3] + x * c[4] + y * c[5]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineCameraModel {
    pub coefficients: [f64; 6],
}

impl AffineCameraModel {
    pub fn new(coefficients: [f64; 6]) -> Self {
        Self { coefficients }
    }

    /// North-up model from the upper-left corner and pixel size in degrees.
    pub fn north_up(ul_lon: f64, ul_lat: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new([ul_lon, pixel_width, 0.0, ul_lat, 0.0, -pixel_height])
    }
}

impl CameraModel for AffineCameraModel {
    fn image_to_world(&self, x: f64, y: f64) -> Result<GeoPoint> {
        let c = &self.coefficients;
        Ok(GeoPoint::new(
            c[0] + x * c[1] + y * c[2],
            c[3] + x * c[4] + y * c[5],
        ))
    }
}

/// Bilinear warp between the four geodetic image corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FourCornerCameraModel {
    pub upper_left: GeoPoint,
    pub upper_right: GeoPoint,
    pub lower_right: GeoPoint,
    pub lower_left: GeoPoint,
    pub width: u32,
    pub height: u32,
}

impl FourCornerCameraModel {
    pub fn new(corners: [GeoPoint; 4], width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RasterError::Camera(format!(
                "four-corner model needs a non-empty image, got {}x{}",
                width, height
            )));
        }
        if corners.iter().any(|c| !c.is_finite()) {
            return Err(RasterError::Camera("non-finite corner coordinate".to_string()));
        }
        let [upper_left, upper_right, lower_right, lower_left] = corners;
        Ok(Self {
            upper_left,
            upper_right,
            lower_right,
            lower_left,
            width,
            height,
        })
    }
}

impl CameraModel for FourCornerCameraModel {
    fn image_to_world(&self, x: f64, y: f64) -> Result<GeoPoint> {
        let u = x / f64::from(self.width);
        let v = y / f64::from(self.height);
        let blend = |ul: f64, ur: f64, lr: f64, ll: f64| {
            ul * (1.0 - u) * (1.0 - v) + ur * u * (1.0 - v) + lr * u * v + ll * (1.0 - u) * v
        };
        Ok(GeoPoint::new(
            blend(
                self.upper_left.lon,
                self.upper_right.lon,
                self.lower_right.lon,
                self.lower_left.lon,
            ),
            blend(
                self.upper_left.lat,
                self.upper_right.lat,
                self.lower_right.lat,
                self.lower_left.lat,
            ),
        ))
    }
}

/// Identity model for sources with no georeferencing; pixels map to degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelCameraModel;

impl CameraModel for PixelCameraModel {
    fn image_to_world(&self, x: f64, y: f64) -> Result<GeoPoint> {
        Ok(GeoPoint::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners() -> [GeoPoint; 4] {
        [
            GeoPoint::new(10.0, 50.0),
            GeoPoint::new(12.0, 50.0),
            GeoPoint::new(12.0, 49.0),
            GeoPoint::new(10.0, 49.0),
        ]
    }

    #[test]
    fn test_affine_north_up() {
        let cam = AffineCameraModel::north_up(-100.0, 40.0, 0.5, 0.25);
        let p = cam.image_to_world(2.0, 4.0).unwrap();
        assert_eq!(p, GeoPoint::new(-99.0, 39.0));
    }

    #[test]
    fn test_four_corner_hits_corners() {
        let cam = FourCornerCameraModel::new(corners(), 100, 50).unwrap();
        assert_eq!(cam.image_to_world(0.0, 0.0).unwrap(), corners()[0]);
        assert_eq!(cam.image_to_world(100.0, 50.0).unwrap(), corners()[2]);
        let mid = cam.image_to_world(50.0, 25.0).unwrap();
        assert!((mid.lon - 11.0).abs() < 1e-9);
        assert!((mid.lat - 49.5).abs() < 1e-9);
    }

    #[test]
    fn test_four_corner_rejects_empty_image() {
        assert!(FourCornerCameraModel::new(corners(), 0, 10).is_err());
    }

    #[test]
    fn test_footprint_is_closed_ring() {
        let cam = FourCornerCameraModel::new(corners(), 100, 50).unwrap();
        let poly = cam.footprint(100, 50).unwrap();
        assert_eq!(poly.ring().len(), 5);
        assert_eq!(poly.envelope().to_array(), [10.0, 49.0, 12.0, 50.0]);
    }
}
