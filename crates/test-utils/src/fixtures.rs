//! Common fixtures: image keys, footprints and mosaic manifests.

use chrono::{TimeZone, Utc};
use pyramid_common::{GeoPoint, ImageKey};

/// Key used by most build tests: `TEST_COLLECTION` at 2020-01-02 03:04:05 UTC.
pub fn test_key() -> ImageKey {
    key_named("TEST_COLLECTION")
}

pub fn key_named(collection_id: &str) -> ImageKey {
    ImageKey::new(
        collection_id,
        Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap(),
        Utc::now(),
    )
    .expect("valid test key")
}

/// Upper-left, upper-right, lower-right, lower-left of a 1x1 degree cell.
pub fn sample_corners() -> [GeoPoint; 4] {
    [
        GeoPoint::new(10.0, 50.0),
        GeoPoint::new(11.0, 50.0),
        GeoPoint::new(11.0, 49.0),
        GeoPoint::new(10.0, 49.0),
    ]
}

/// JSON mosaic manifest.
///
/// `parts` are `(file, row, col)`; the mosaic size is the part size times
/// the grid extent.
pub fn json_manifest(
    product_id: &str,
    part_width: u32,
    part_height: u32,
    bands: u32,
    parts: &[(&str, u32, u32)],
) -> String {
    let rows = parts.iter().map(|p| p.1 + 1).max().unwrap_or(1);
    let cols = parts.iter().map(|p| p.2 + 1).max().unwrap_or(1);
    let corners: Vec<serde_json::Value> = sample_corners()
        .iter()
        .map(|c| serde_json::json!({ "lon": c.lon, "lat": c.lat }))
        .collect();
    let parts: Vec<serde_json::Value> = parts
        .iter()
        .map(|(file, row, col)| serde_json::json!({ "file": file, "row": row, "col": col }))
        .collect();

    serde_json::json!({
        "product_id": product_id,
        "collect_time": "2019-07-08T09:10:11Z",
        "width": part_width * cols,
        "height": part_height * rows,
        "bits_per_pixel": 8,
        "bands": bands,
        "part_width": part_width,
        "part_height": part_height,
        "corners": corners,
        "parts": parts,
    })
    .to_string()
}

/// DigitalGlobe product XML for a two-part panchromatic mosaic of
/// 1024x512 parts laid side by side.
pub const DG_TWO_PART_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<isd>
  <IMD>
    <VERSION>AA</VERSION>
    <PRODUCTORDERID>010203040506_01_P001</PRODUCTORDERID>
    <BANDID>P</BANDID>
    <BITSPERPIXEL>8</BITSPERPIXEL>
    <NUMROWS>512</NUMROWS>
    <NUMCOLUMNS>2048</NUMCOLUMNS>
    <BAND_P>
      <ULLON>10.0</ULLON>
      <ULLAT>50.0</ULLAT>
      <URLON>11.0</URLON>
      <URLAT>50.0</URLAT>
      <LRLON>11.0</LRLON>
      <LRLAT>49.0</LRLAT>
      <LLLON>10.0</LLLON>
      <LLLAT>49.0</LLLAT>
    </BAND_P>
    <IMAGE>
      <SATID>WV02</SATID>
      <FIRSTLINETIME>2015-04-03T02:01:00.500000Z</FIRSTLINETIME>
    </IMAGE>
  </IMD>
  <TIL>
    <BANDID>P</BANDID>
    <NUMTILES>2</NUMTILES>
    <TILESIZEX>1024</TILESIZEX>
    <TILESIZEY>512</TILESIZEY>
    <TILEUNITS>Pixels</TILEUNITS>
    <TILEOVERLAP>0</TILEOVERLAP>
    <TILE>
      <FILENAME>15APR03020100-P2AS_R1C1-010203040506_01_P001.png</FILENAME>
      <ULCOLOFFSET>0</ULCOLOFFSET>
      <ULROWOFFSET>0</ULROWOFFSET>
    </TILE>
    <TILE>
      <FILENAME>15APR03020100-P2AS_R1C2-010203040506_01_P001.png</FILENAME>
      <ULCOLOFFSET>1024</ULCOLOFFSET>
      <ULROWOFFSET>0</ULROWOFFSET>
    </TILE>
  </TIL>
</isd>
"#;
