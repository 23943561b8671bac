//! Identity of a single source image.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::{PyramidError, PyramidResult};

/// `strftime` pattern used for the collect time path component.
pub const COLLECT_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Immutable identity of one ingested image.
///
/// All storage keys for a pyramid hang off `collectionId/collectTime`,
/// so two builds with the same key overwrite the same objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageKey {
    pub collection_id: String,
    pub collect_time: DateTime<Utc>,
    pub processing_time: DateTime<Utc>,
}

impl ImageKey {
    /// Create a key, rejecting collection ids that would break the path layout.
    pub fn new(
        collection_id: impl Into<String>,
        collect_time: DateTime<Utc>,
        processing_time: DateTime<Utc>,
    ) -> PyramidResult<Self> {
        let collection_id = collection_id.into();
        let trimmed = collection_id.trim();
        if trimmed.is_empty() {
            return Err(PyramidError::InvalidImageKey(
                "collection id is empty".to_string(),
            ));
        }
        if trimmed.contains('/') || trimmed.contains('\\') {
            return Err(PyramidError::InvalidImageKey(format!(
                "collection id '{}' contains a path separator",
                trimmed
            )));
        }

        Ok(Self {
            collection_id: trimmed.to_string(),
            collect_time,
            processing_time,
        })
    }

    /// Fallback key for sources without usable acquisition metadata.
    ///
    /// The collection id is the object's base name without extension and
    /// the collect time is the notification (or modification) timestamp.
    pub fn fallback(object_name: &str, timestamp: DateTime<Utc>) -> PyramidResult<Self> {
        let base = object_name
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(object_name);
        let stem = match base.rfind('.') {
            Some(idx) if idx > 0 => &base[..idx],
            _ => base,
        };
        Self::new(stem, truncate_to_seconds(timestamp), Utc::now())
    }

    /// Fallback key derived from a local file's name and modification time.
    pub fn from_file(path: &Path) -> PyramidResult<Self> {
        let modified: DateTime<Utc> = std::fs::metadata(path)?.modified()?.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                PyramidError::InvalidImageKey(format!("unusable file name: {}", path.display()))
            })?;
        Self::fallback(name, modified)
    }

    /// Collect time rendered as `YYYYMMDDHHMMSS` (UTC).
    pub fn collect_time_string(&self) -> String {
        self.collect_time.format(COLLECT_TIME_FORMAT).to_string()
    }

    /// Collection id and collect time joined by `delimiter`.
    pub fn name(&self, delimiter: &str) -> String {
        format!(
            "{}{}{}",
            self.collection_id,
            delimiter,
            self.collect_time_string()
        )
    }

    /// Canonical storage prefix: `collectionId/collectTime`.
    pub fn path_prefix(&self) -> String {
        self.name("/")
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name(":"))
    }
}

fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp(), 0).single().unwrap_or(ts)
}
