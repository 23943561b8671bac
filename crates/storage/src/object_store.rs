//! Object storage backend (MinIO/S3 compatible).

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, instrument};

use crate::sink::{BlobEntry, BlobStore, PyramidSink};
use crate::{Result, StorageError};

/// Configuration for object storage connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://minio:9000".to_string(),
            bucket: "tile-pyramids".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
        }
    }
}

/// Blocking facade over an async [`ObjectStore`].
///
/// Every call is driven to completion on `runtime`, so methods must be
/// called from outside the runtime's async context (worker pool threads,
/// `spawn_blocking`).
pub struct ObjectStoreBlobs {
    store: Arc<dyn ObjectStore>,
    runtime: Handle,
    bucket: String,
}

/// Sink writing a pyramid into an object store bucket.
pub type ObjectStoreSink = PyramidSink<ObjectStoreBlobs>;

impl ObjectStoreBlobs {
    /// Connect to an S3-compatible bucket.
    pub fn new(config: &ObjectStorageConfig, runtime: Handle) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ObjectStore(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self::from_store(Arc::new(store), runtime, config.bucket.clone()))
    }

    /// Wrap an existing store (in-memory stores in tests, other providers).
    pub fn from_store(store: Arc<dyn ObjectStore>, runtime: Handle, bucket: impl Into<String>) -> Self {
        Self {
            store,
            runtime,
            bucket: bucket.into(),
        }
    }

    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

impl BlobStore for ObjectStoreBlobs {
    #[instrument(skip(self, data), fields(bucket = %self.bucket, path = %key))]
    fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let location = Path::from(key);
        let size = data.len();

        self.runtime
            .block_on(self.store.put(&location, Bytes::from(data).into()))
            .map_err(|e| StorageError::ObjectStore(format!("Failed to write {}: {}", key, e)))?;

        debug!(size, "Wrote object");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, path = %key))]
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let location = Path::from(key);

        let bytes = self.runtime.block_on(async {
            let result = self.store.get(&location).await?;
            result.bytes().await
        });

        match bytes {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(StorageError::ObjectStore(format!(
                "Failed to read {}: {}",
                key, e
            ))),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        // Path::from drops the trailing slash; filter on the raw prefix.
        let prefix_path = Path::from(prefix);
        let metas: Vec<object_store::ObjectMeta> = self
            .runtime
            .block_on(self.store.list(Some(&prefix_path)).try_collect())
            .map_err(|e| StorageError::ObjectStore(format!("Failed to list {}: {}", prefix, e)))?;

        let mut entries: Vec<BlobEntry> = metas
            .into_iter()
            .map(|m| BlobEntry {
                key: m.location.to_string(),
                size: m.size as u64,
            })
            .filter(|e| e.key.starts_with(prefix))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
