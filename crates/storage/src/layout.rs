//! Canonical storage keys for a published pyramid.
//!
//! ```text
//! {collectionId}/{collectTime}/metadata.json
//! {collectionId}/{collectTime}/{rlevel}/{col}/{row}/{band}.png
//! {collectionId}/{collectTime}/image.idx
//! ```
//!
//! Keys always use `/`; backends translate them to their own separator.

use pyramid_common::{ImageKey, TileAddress};

pub const METADATA_FILE: &str = "metadata.json";
pub const INDEX_FILE: &str = "image.idx";
pub const TILE_EXTENSION: &str = "png";

/// Key builder, optionally rooted under a fixed prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PyramidLayout {
    prefix: Option<String>,
}

/// Components recovered from a tile key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTileKey {
    pub collection_id: String,
    pub collect_time: String,
    pub address: TileAddress,
}

impl PyramidLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout rooted at `prefix` (leading and trailing slashes are ignored).
    pub fn with_prefix(prefix: impl AsRef<str>) -> Self {
        let trimmed = prefix.as_ref().trim_matches('/');
        Self {
            prefix: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// `[prefix/]collectionId/collectTime`
    pub fn image_prefix(&self, key: &ImageKey) -> String {
        match &self.prefix {
            Some(p) => format!("{}/{}", p, key.path_prefix()),
            None => key.path_prefix(),
        }
    }

    pub fn metadata_key(&self, key: &ImageKey) -> String {
        format!("{}/{}", self.image_prefix(key), METADATA_FILE)
    }

    pub fn index_key(&self, key: &ImageKey) -> String {
        format!("{}/{}", self.image_prefix(key), INDEX_FILE)
    }

    pub fn tile_key(&self, key: &ImageKey, address: &TileAddress) -> String {
        format!(
            "{}/{}/{}/{}/{}.{}",
            self.image_prefix(key),
            address.rlevel,
            address.col,
            address.row,
            address.band,
            TILE_EXTENSION
        )
    }

    /// Parse a tile key produced by [`tile_key`](Self::tile_key).
    pub fn parse_tile_key(&self, key: &str) -> Option<ParsedTileKey> {
        let rest = match &self.prefix {
            Some(p) => key.strip_prefix(p.as_str())?.strip_prefix('/')?,
            None => key,
        };
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != 6 || parts[0].is_empty() || parts[1].is_empty() {
            return None;
        }
        let band = parts[5].strip_suffix(".png")?;
        Some(ParsedTileKey {
            collection_id: parts[0].to_string(),
            collect_time: parts[1].to_string(),
            address: TileAddress::new(
                parts[2].parse().ok()?,
                parts[3].parse().ok()?,
                parts[4].parse().ok()?,
                band.parse().ok()?,
            ),
        })
    }
}
