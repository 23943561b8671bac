//! Mosaic product manifests.
//!
//! A manifest describes one logical image stored as a grid of part
//! files: overall size, sample depth, band set, geodetic corners and the
//! grid position of each part. Two encodings are accepted:
//!
//! - JSON, deserialized directly into [`MosaicManifest`]
//! - DigitalGlobe product XML (`IMD` and `TIL` sections)

use chrono::{DateTime, NaiveDateTime, Utc};
use pyramid_common::{GeoPoint, ImageKey};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::warn;

use crate::{IngestionError, Result};

/// One part file and its 0-based position on the part grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSpec {
    pub file: String,
    pub row: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicManifest {
    /// Becomes the image's collection id.
    pub product_id: String,
    pub collect_time: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u8,
    /// Band set code: `Multi`, `RGB` or `P`.
    #[serde(default)]
    pub band_id: Option<String>,
    /// Explicit band count, overriding the band set code.
    #[serde(default)]
    pub bands: Option<u32>,
    /// Nominal part size in pixels.
    pub part_width: u32,
    pub part_height: u32,
    #[serde(default)]
    pub overlap: u32,
    /// Upper-left, upper-right, lower-right, lower-left.
    pub corners: [GeoPoint; 4],
    pub parts: Vec<PartSpec>,
}

impl MosaicManifest {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| IngestionError::Manifest(e.to_string()))
    }

    /// Read a manifest file, choosing the parser by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_xml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if is_xml {
            Self::from_dg_xml(&text)
        } else {
            Self::from_json(&text)
        }
    }

    /// Parse a DigitalGlobe product XML document.
    pub fn from_dg_xml(xml: &str) -> Result<Self> {
        let doc = DgDocument::parse(xml)?;

        let product_id = doc.required("IMD/PRODUCTORDERID")?.to_string();
        let collect_time = parse_line_time(doc.required("IMD/IMAGE/FIRSTLINETIME")?)?;
        let width = doc.number("IMD/NUMCOLUMNS")?;
        let height = doc.number("IMD/NUMROWS")?;
        let bits_per_pixel = doc.number("IMD/BITSPERPIXEL")?;
        let band_id = doc.first("IMD/BANDID").map(str::to_string);
        let part_width = doc.number("TIL/TILESIZEX")?;
        let part_height = doc.number("TIL/TILESIZEY")?;
        let overlap = doc.number("TIL/TILEOVERLAP")?;

        let band = doc.band_section().ok_or_else(|| {
            IngestionError::Manifest("no IMD/BAND_* section with corner coordinates".to_string())
        })?;
        let corner = |name: &str| -> Result<GeoPoint> {
            Ok(GeoPoint::new(
                doc.number(&format!("{}/{}LON", band, name))?,
                doc.number(&format!("{}/{}LAT", band, name))?,
            ))
        };
        let corners = [corner("UL")?, corner("UR")?, corner("LR")?, corner("LL")?];

        let parts = doc
            .tiles
            .iter()
            .map(|tile| tile.part_spec(doc.tiles.len(), part_width, part_height))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            product_id,
            collect_time,
            width,
            height,
            bits_per_pixel,
            band_id,
            bands: None,
            part_width,
            part_height,
            overlap,
            corners,
            parts,
        })
    }

    /// Reject layouts the assembler cannot place on the tile grid.
    pub fn validate(&self, tile_size: u32) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(IngestionError::Manifest(format!(
                "invalid image size {}x{}",
                self.width, self.height
            )));
        }
        if self.part_width == 0
            || self.part_height == 0
            || self.part_width % tile_size != 0
            || self.part_height % tile_size != 0
        {
            return Err(IngestionError::UnsupportedLayout(format!(
                "part size {}x{} is not a multiple of tile size {}",
                self.part_width, self.part_height, tile_size
            )));
        }
        if self.overlap != 0 {
            return Err(IngestionError::UnsupportedLayout(format!(
                "part overlap {} (only 0 supported)",
                self.overlap
            )));
        }
        if self.parts.is_empty() {
            return Err(IngestionError::Manifest("manifest lists no parts".to_string()));
        }

        let mut seen = HashSet::new();
        for part in &self.parts {
            if !seen.insert((part.row, part.col)) {
                return Err(IngestionError::Manifest(format!(
                    "two parts at row {} col {}",
                    part.row, part.col
                )));
            }
        }
        Ok(())
    }

    pub fn image_key(&self) -> Result<ImageKey> {
        Ok(ImageKey::new(&self.product_id, self.collect_time, Utc::now())?)
    }

    /// Part tile counts at level 0.
    pub fn tiles_per_part(&self, tile_size: u32) -> (u32, u32) {
        (self.part_width / tile_size, self.part_height / tile_size)
    }

    pub fn num_bands(&self) -> u32 {
        self.bands
            .or_else(|| self.band_id.as_deref().and_then(band_set_count))
            .unwrap_or(1)
    }

    /// Descriptor payload describing the band set and sample depth.
    pub fn metadata(&self) -> serde_json::Value {
        let mut meta = serde_json::Map::new();
        match self.band_id.as_deref() {
            Some(id) => match band_set(id) {
                Some((irep, icat, nbands)) => {
                    meta.insert("IREP".into(), irep.into());
                    meta.insert("ICAT".into(), icat.into());
                    meta.insert("NBANDS".into(), nbands.into());
                }
                None => warn!(band_id = id, "Unsupported band set; metadata is incomplete"),
            },
            None => {
                meta.insert("NBANDS".into(), self.num_bands().into());
            }
        }
        meta.insert("NBPP".into(), self.bits_per_pixel.into());
        meta.insert("ABPP".into(), self.bits_per_pixel.into());
        meta.insert("NCOLS".into(), self.width.into());
        meta.insert("NROWS".into(), self.height.into());
        serde_json::Value::Object(meta)
    }
}

/// `(IREP, ICAT, NBANDS)` for a band set code.
fn band_set(id: &str) -> Option<(&'static str, &'static str, u32)> {
    match id {
        "Multi" => Some(("MULTI", "MS", 8)),
        "RGB" => Some(("RGB", "MS", 3)),
        "P" => Some(("MONO", "VIS", 1)),
        _ => None,
    }
}

fn band_set_count(id: &str) -> Option<u32> {
    band_set(id).map(|(_, _, n)| n)
}

fn parse_line_time(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|e| IngestionError::Manifest(format!("bad FIRSTLINETIME '{}': {}", text, e)))
}

/// Grid position from a `..._R<row>C<col>-...` file name, 1-based.
fn position_from_name(name: &str) -> Option<(u32, u32)> {
    let start = name.find("_R")? + 2;
    let rest = &name[start..];
    let c = rest.find('C')?;
    let row: u32 = rest[..c].parse().ok()?;
    let rest = &rest[c + 1..];
    let dash = rest.find('-')?;
    let col: u32 = rest[..dash].parse().ok()?;
    Some((row.checked_sub(1)?, col.checked_sub(1)?))
}

#[derive(Debug, Default)]
struct DgTile {
    filename: Option<String>,
    fields: HashMap<String, String>,
}

impl DgTile {
    fn part_spec(&self, tile_count: usize, part_width: u32, part_height: u32) -> Result<PartSpec> {
        let file = self
            .filename
            .clone()
            .ok_or_else(|| IngestionError::Manifest("TILE without FILENAME".to_string()))?;

        if tile_count == 1 {
            return Ok(PartSpec { file, row: 0, col: 0 });
        }
        if let Some((row, col)) = position_from_name(&file) {
            return Ok(PartSpec { file, row, col });
        }

        let offset = |name: &str| self.fields.get(name).and_then(|v| v.parse::<u32>().ok());
        match (offset("ULCOLOFFSET"), offset("ULROWOFFSET")) {
            (Some(x), Some(y)) if part_width > 0 && part_height > 0 => Ok(PartSpec {
                file,
                row: y / part_height,
                col: x / part_width,
            }),
            _ => Err(IngestionError::Manifest(format!(
                "cannot place part {} on the part grid",
                file
            ))),
        }
    }
}

/// Flattened view of the XML: text by element path, plus the TILE list.
#[derive(Debug, Default)]
struct DgDocument {
    values: HashMap<String, Vec<String>>,
    /// `IMD/BAND_*` section names in document order.
    band_sections: Vec<String>,
    tiles: Vec<DgTile>,
}

impl DgDocument {
    fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut doc = DgDocument::default();
        let mut stack: Vec<String> = Vec::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    stack.push(name);
                    let path = section_path(&stack);
                    if path == "TIL/TILE" {
                        doc.tiles.push(DgTile::default());
                    } else if path.starts_with("IMD/BAND_")
                        && stack.len() == section_depth(&stack) + 2
                        && !doc.band_sections.contains(&path)
                    {
                        doc.band_sections.push(path);
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| IngestionError::Manifest(e.to_string()))?
                        .into_owned();
                    let path = section_path(&stack);
                    if let Some(field) = path.strip_prefix("TIL/TILE/") {
                        if let Some(tile) = doc.tiles.last_mut() {
                            if field == "FILENAME" {
                                tile.filename = Some(text.clone());
                            }
                            tile.fields.insert(field.to_string(), text.clone());
                        }
                    }
                    doc.values.entry(path).or_default().push(text);
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(IngestionError::Manifest(format!(
                        "XML error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        Ok(doc)
    }

    fn first(&self, path: &str) -> Option<&str> {
        self.values
            .get(path)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    fn required(&self, path: &str) -> Result<&str> {
        self.first(path)
            .ok_or_else(|| IngestionError::Manifest(format!("missing {}", path)))
    }

    fn number<T: std::str::FromStr>(&self, path: &str) -> Result<T> {
        let text = self.required(path)?;
        text.trim()
            .parse()
            .map_err(|_| IngestionError::Manifest(format!("{} is not a number: '{}'", path, text)))
    }

    fn band_section(&self) -> Option<&str> {
        self.band_sections.first().map(String::as_str)
    }
}

/// Depth of the `IMD`/`TIL` section root within the element stack.
fn section_depth(stack: &[String]) -> usize {
    stack
        .iter()
        .position(|s| s == "IMD" || s == "TIL")
        .unwrap_or(0)
}

/// Element path starting at the `IMD`/`TIL` section, without any wrapper root.
fn section_path(stack: &[String]) -> String {
    stack[section_depth(stack)..].join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<isd>
  <IMD>
    <PRODUCTORDERID>058100123010_01_P001</PRODUCTORDERID>
    <BANDID>P</BANDID>
    <BITSPERPIXEL>11</BITSPERPIXEL>
    <NUMROWS>2048</NUMROWS>
    <NUMCOLUMNS>2048</NUMCOLUMNS>
    <BAND_P>
      <ULLON>10.0</ULLON><ULLAT>50.0</ULLAT>
      <URLON>11.0</URLON><URLAT>50.0</URLAT>
      <LRLON>11.0</LRLON><LRLAT>49.0</LRLAT>
      <LLLON>10.0</LLLON><LLLAT>49.0</LLLAT>
    </BAND_P>
    <IMAGE>
      <FIRSTLINETIME>2016-05-16T16:05:42.123456Z</FIRSTLINETIME>
    </IMAGE>
  </IMD>
  <TIL>
    <TILESIZEX>1024</TILESIZEX>
    <TILESIZEY>2048</TILESIZEY>
    <TILEOVERLAP>0</TILEOVERLAP>
    <TILE><FILENAME>16MAY16160542-P2AS_R1C1-058100123010_01_P001.TIF</FILENAME></TILE>
    <TILE><FILENAME>16MAY16160542-P2AS_R1C2-058100123010_01_P001.TIF</FILENAME></TILE>
  </TIL>
</isd>"#;

    #[test]
    fn test_parse_dg_xml() {
        let manifest = MosaicManifest::from_dg_xml(XML).unwrap();
        assert_eq!(manifest.product_id, "058100123010_01_P001");
        assert_eq!((manifest.width, manifest.height), (2048, 2048));
        assert_eq!(manifest.bits_per_pixel, 11);
        assert_eq!((manifest.part_width, manifest.part_height), (1024, 2048));
        assert_eq!(manifest.corners[2], GeoPoint::new(11.0, 49.0));
        assert_eq!(manifest.parts.len(), 2);
        assert_eq!((manifest.parts[1].row, manifest.parts[1].col), (0, 1));
        assert_eq!(
            manifest.image_key().unwrap().collect_time_string(),
            "20160516160542"
        );
        manifest.validate(512).unwrap();
    }

    #[test]
    fn test_band_metadata() {
        let manifest = MosaicManifest::from_dg_xml(XML).unwrap();
        let meta = manifest.metadata();
        assert_eq!(meta["IREP"], "MONO");
        assert_eq!(meta["ICAT"], "VIS");
        assert_eq!(meta["NBANDS"], 1);
        assert_eq!(meta["NBPP"], 11);
        assert_eq!(manifest.num_bands(), 1);
    }

    #[test]
    fn test_overlap_is_unsupported() {
        let xml = XML.replace("<TILEOVERLAP>0</TILEOVERLAP>", "<TILEOVERLAP>8</TILEOVERLAP>");
        let manifest = MosaicManifest::from_dg_xml(&xml).unwrap();
        assert!(matches!(
            manifest.validate(512),
            Err(IngestionError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn test_part_size_must_be_tile_multiple() {
        let xml = XML.replace("<TILESIZEX>1024</TILESIZEX>", "<TILESIZEX>1000</TILESIZEX>");
        let manifest = MosaicManifest::from_dg_xml(&xml).unwrap();
        assert!(matches!(
            manifest.validate(512),
            Err(IngestionError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn test_missing_field_is_manifest_error() {
        let xml = XML.replace("<NUMROWS>2048</NUMROWS>", "");
        assert!(matches!(
            MosaicManifest::from_dg_xml(&xml),
            Err(IngestionError::Manifest(_))
        ));
    }

    #[test]
    fn test_position_from_name() {
        assert_eq!(position_from_name("X_R2C3-Y.TIF"), Some((1, 2)));
        assert_eq!(position_from_name("X_R0C3-Y.TIF"), None);
        assert_eq!(position_from_name("plain.tif"), None);
    }

    #[test]
    fn test_duplicate_positions_rejected() {
        let mut manifest = MosaicManifest::from_dg_xml(XML).unwrap();
        manifest.parts[1].col = 0;
        assert!(matches!(
            manifest.validate(512),
            Err(IngestionError::Manifest(_))
        ));
    }

    #[test]
    fn test_json_manifest() {
        let json = r#"{
            "product_id": "SCENE",
            "collect_time": "2021-03-04T05:06:07Z",
            "width": 1024, "height": 512, "bits_per_pixel": 8,
            "bands": 2,
            "part_width": 512, "part_height": 512,
            "corners": [
                {"lon": 0.0, "lat": 1.0}, {"lon": 2.0, "lat": 1.0},
                {"lon": 2.0, "lat": 0.0}, {"lon": 0.0, "lat": 0.0}
            ],
            "parts": [
                {"file": "a.png", "row": 0, "col": 0},
                {"file": "b.png", "row": 0, "col": 1}
            ]
        }"#;
        let manifest = MosaicManifest::from_json(json).unwrap();
        assert_eq!(manifest.overlap, 0);
        assert_eq!(manifest.num_bands(), 2);
        assert_eq!(manifest.tiles_per_part(512), (1, 1));
        assert_eq!(manifest.metadata()["NBANDS"], 2);
        manifest.validate(512).unwrap();
    }
}
