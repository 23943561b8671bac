//! The `metadata.json` document written before any tile of a pyramid.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{GeoPolygon, LevelPlan, PyramidResult};

const IDENTIFIER_PREFIX: &str = "guide://000000/";

/// Namespace for name-based pyramid identifiers.
const IDENTIFIER_NAMESPACE: Uuid = Uuid::NAMESPACE_URL;

/// Deterministic identifier for a pyramid name.
pub fn pyramid_identifier(name: &str) -> String {
    let uuid = Uuid::new_v5(&IDENTIFIER_NAMESPACE, format!("IMAGE:{}", name).as_bytes());
    format!("{}{}", IDENTIFIER_PREFIX, uuid)
}

/// Shape and footprint of a published tile pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilePyramidDescriptor {
    pub identifier: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    #[serde(rename = "minrlevel")]
    pub min_r_level: u32,
    #[serde(rename = "maxRLevel")]
    pub max_r_level: u32,
    pub num_bands: u32,
    pub bounding_box: [f64; 4],
    pub bounds: GeoPolygon,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TilePyramidDescriptor {
    /// Build the descriptor for `name` from a level plan and footprint.
    pub fn new(
        name: impl Into<String>,
        plan: &LevelPlan,
        num_bands: u32,
        bounds: GeoPolygon,
        metadata: serde_json::Value,
    ) -> Self {
        let name = name.into();
        Self {
            identifier: pyramid_identifier(&name),
            bounding_box: bounds.envelope().to_array(),
            name,
            description: None,
            width: plan.width,
            height: plan.height,
            tile_width: plan.tile_size,
            tile_height: plan.tile_size,
            min_r_level: 0,
            max_r_level: plan.max_rlevel,
            num_bands,
            bounds,
            metadata,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Level plan implied by the descriptor.
    pub fn level_plan(&self) -> PyramidResult<LevelPlan> {
        LevelPlan::new(self.width, self.height, self.tile_width)
    }

    pub fn to_json_bytes(&self) -> PyramidResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_slice(bytes: &[u8]) -> PyramidResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeoPoint;

    fn bounds() -> GeoPolygon {
        GeoPolygon::from_corners([
            GeoPoint::new(-77.1, 38.9),
            GeoPoint::new(-77.0, 38.9),
            GeoPoint::new(-77.0, 38.8),
            GeoPoint::new(-77.1, 38.8),
        ])
        .unwrap()
    }

    #[test]
    fn test_identifier_is_deterministic() {
        assert_eq!(pyramid_identifier("A:1"), pyramid_identifier("A:1"));
        assert_ne!(pyramid_identifier("A:1"), pyramid_identifier("A:2"));
        assert!(pyramid_identifier("A:1").starts_with("guide://000000/"));
    }

    #[test]
    fn test_descriptor_fields() {
        let plan = LevelPlan::new(1536, 1025, 512).unwrap();
        let d = TilePyramidDescriptor::new("A:1", &plan, 3, bounds(), serde_json::json!({}));
        assert_eq!(d.max_r_level, 2);
        assert_eq!(d.min_r_level, 0);
        assert_eq!(d.tile_width, 512);
        assert_eq!(d.bounding_box, [-77.1, 38.8, -77.0, 38.9]);
    }

    #[test]
    fn test_json_keys() {
        let plan = LevelPlan::new(100, 100, 512).unwrap();
        let d = TilePyramidDescriptor::new("A:1", &plan, 1, bounds(), serde_json::Value::Null);
        let json: serde_json::Value =
            serde_json::from_slice(&d.to_json_bytes().unwrap()).unwrap();
        assert_eq!(json["minrlevel"], 0);
        assert_eq!(json["maxRLevel"], 0);
        assert_eq!(json["tileWidth"], 512);
        assert_eq!(json["bounds"]["type"], "Polygon");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_json_roundtrip_preserves_plan() {
        let plan = LevelPlan::new(4000, 3000, 512).unwrap();
        let d = TilePyramidDescriptor::new("A:1", &plan, 1, bounds(), serde_json::json!({"k": 1}))
            .with_description("scene");
        let back = TilePyramidDescriptor::from_json_slice(&d.to_json_bytes().unwrap()).unwrap();
        assert_eq!(back.level_plan().unwrap(), plan);
        assert_eq!(back.description.as_deref(), Some("scene"));
    }
}
