//! Ingester configuration.

use ingestion::PyramidConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use storage::queue::{DEFAULT_CONSUMER_GROUP, DEFAULT_RECLAIM_IDLE_MS, DEFAULT_STREAM_KEY};
use storage::ObjectStorageConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid pyramid settings: {0}")]
    Pyramid(String),
}

/// Top-level ingester configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngesterConfig {
    /// Object storage connection, used when publishing to a bucket.
    pub storage: ObjectStorageConfig,

    /// Key prefix inside the bucket.
    pub storage_prefix: Option<String>,

    /// Local output root, used when publishing to disk.
    pub output_root: Option<PathBuf>,

    /// Redis URL for the notification stream.
    pub redis_url: String,

    pub stream_key: String,

    pub consumer_group: String,

    /// Milliseconds an unacknowledged notification waits before redelivery.
    pub reclaim_idle_ms: usize,

    /// Directory notification sources are resolved against.
    pub source_root: PathBuf,

    pub pyramid: PyramidConfig,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            storage: ObjectStorageConfig::default(),
            storage_prefix: None,
            output_root: None,
            redis_url: "redis://redis:6379".to_string(),
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            reclaim_idle_ms: DEFAULT_RECLAIM_IDLE_MS,
            source_root: PathBuf::from("."),
            pyramid: PyramidConfig::default(),
        }
    }
}

impl IngesterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, then let environment variables override it.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = serde_yaml::from_str(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        let storage = &mut self.storage;
        if let Ok(v) = env::var("S3_ENDPOINT") {
            storage.endpoint = v;
        }
        if let Ok(v) = env::var("S3_BUCKET") {
            storage.bucket = v;
        }
        if let Ok(v) = env::var("S3_ACCESS_KEY") {
            storage.access_key_id = v;
        }
        if let Ok(v) = env::var("S3_SECRET_KEY") {
            storage.secret_access_key = v;
        }
        if let Ok(v) = env::var("S3_REGION") {
            storage.region = v;
        }
        if let Ok(v) = env::var("S3_ALLOW_HTTP") {
            storage.allow_http = v == "true";
        }
        if let Ok(v) = env::var("S3_PREFIX") {
            self.storage_prefix = Some(v);
        }
        if let Ok(v) = env::var("OUTPUT_ROOT") {
            self.output_root = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("SOURCE_ROOT") {
            self.source_root = PathBuf::from(v);
        }
        if let Ok(v) = env::var("REDIS_URL") {
            self.redis_url = v;
        }
        if let Ok(v) = env::var("INGEST_STREAM") {
            self.stream_key = v;
        }
        if let Ok(v) = env::var("INGEST_GROUP") {
            self.consumer_group = v;
        }
        if let Some(ms) = env::var("INGEST_RECLAIM_IDLE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.reclaim_idle_ms = ms;
        }
        self.pyramid.apply_env();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pyramid.validate().map_err(ConfigError::Pyramid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_partial_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingester.yaml");
        std::fs::write(
            &path,
            "output_root: /data/pyramids\npyramid:\n  tile_size: 256\n  downsample_method: nearest\n",
        )
        .unwrap();

        let config = IngesterConfig::from_yaml(&path).unwrap();
        assert_eq!(config.output_root, Some(PathBuf::from("/data/pyramids")));
        assert_eq!(config.pyramid.tile_size, 256);
        assert_eq!(config.stream_key, DEFAULT_STREAM_KEY);
        assert_eq!(config.reclaim_idle_ms, DEFAULT_RECLAIM_IDLE_MS);
        assert_eq!(config.storage.bucket, ObjectStorageConfig::default().bucket);
    }

    #[test]
    fn test_yaml_invalid_pyramid_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "pyramid:\n  tile_size: 0\n").unwrap();
        assert!(matches!(
            IngesterConfig::from_yaml(&path),
            Err(ConfigError::Pyramid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            IngesterConfig::from_yaml("/nonexistent/ingester.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
