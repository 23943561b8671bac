//! Geodetic footprint types.
//!
//! Polygons serialize as GeoJSON `Polygon` geometries with
//! `[longitude, latitude]` positions.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{PyramidError, PyramidResult};

/// A geodetic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

/// Axis-aligned envelope `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Closed ring of geodetic positions.
///
/// Built from the four image corners in (0,0), (w,0), (w,h), (0,h) order
/// with the first corner repeated at the end.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPolygon {
    ring: Vec<GeoPoint>,
}

impl GeoPolygon {
    /// Close the ring formed by four corners.
    pub fn from_corners(corners: [GeoPoint; 4]) -> PyramidResult<Self> {
        if let Some(bad) = corners.iter().find(|c| !c.is_finite()) {
            return Err(PyramidError::InvalidGeometry(format!(
                "non-finite corner ({}, {})",
                bad.lon, bad.lat
            )));
        }
        let mut ring = corners.to_vec();
        ring.push(corners[0]);
        Ok(Self { ring })
    }

    /// Wrap an explicit ring, closing it if needed.
    pub fn from_ring(mut ring: Vec<GeoPoint>) -> PyramidResult<Self> {
        if ring.len() < 3 {
            return Err(PyramidError::InvalidGeometry(format!(
                "ring needs at least 3 positions, got {}",
                ring.len()
            )));
        }
        if ring.first() != ring.last() {
            let first = ring[0];
            ring.push(first);
        }
        Ok(Self { ring })
    }

    /// Positions including the closing point.
    pub fn ring(&self) -> &[GeoPoint] {
        &self.ring
    }

    pub fn envelope(&self) -> BoundingBox {
        let mut bbox = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for p in &self.ring {
            bbox.min_x = bbox.min_x.min(p.lon);
            bbox.min_y = bbox.min_y.min(p.lat);
            bbox.max_x = bbox.max_x.max(p.lon);
            bbox.max_y = bbox.max_y.max(p.lat);
        }
        bbox
    }
}

#[derive(Serialize, Deserialize)]
struct GeoJsonPolygon {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<Vec<[f64; 2]>>,
}

impl Serialize for GeoPolygon {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GeoJsonPolygon {
            kind: "Polygon".to_string(),
            coordinates: vec![self.ring.iter().map(|p| [p.lon, p.lat]).collect()],
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GeoPolygon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = GeoJsonPolygon::deserialize(deserializer)?;
        if raw.kind != "Polygon" {
            return Err(D::Error::custom(format!(
                "expected Polygon geometry, got {}",
                raw.kind
            )));
        }
        let exterior = raw
            .coordinates
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("polygon has no rings"))?;
        GeoPolygon::from_ring(
            exterior
                .into_iter()
                .map(|[lon, lat]| GeoPoint::new(lon, lat))
                .collect(),
        )
        .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> GeoPolygon {
        GeoPolygon::from_corners([
            GeoPoint::new(10.0, 21.0),
            GeoPoint::new(11.0, 21.0),
            GeoPoint::new(11.0, 20.0),
            GeoPoint::new(10.0, 20.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_ring_is_closed() {
        let poly = square();
        assert_eq!(poly.ring().len(), 5);
        assert_eq!(poly.ring()[0], poly.ring()[4]);
    }

    #[test]
    fn test_envelope() {
        assert_eq!(square().envelope().to_array(), [10.0, 20.0, 11.0, 21.0]);
    }

    #[test]
    fn test_geojson_shape() {
        let json = serde_json::to_value(square()).unwrap();
        assert_eq!(json["type"], "Polygon");
        assert_eq!(json["coordinates"][0].as_array().unwrap().len(), 5);
        assert_eq!(json["coordinates"][0][1][0], 11.0);
    }

    #[test]
    fn test_geojson_parse_closes_ring() {
        let poly: GeoPolygon = serde_json::from_str(
            r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1]]]}"#,
        )
        .unwrap();
        assert_eq!(poly.ring().len(), 5);
    }

    #[test]
    fn test_rejects_nan_corner() {
        let result = GeoPolygon::from_corners([
            GeoPoint::new(f64::NAN, 0.0),
            GeoPoint::new(1.0, 0.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(0.0, 1.0),
        ]);
        assert!(result.is_err());
    }
}
