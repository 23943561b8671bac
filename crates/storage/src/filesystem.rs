//! Local filesystem backend.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::sink::{BlobEntry, BlobStore, PyramidSink};
use crate::{Result, StorageError};

/// Stores each key as a file below `root`, one directory per key segment.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    root: PathBuf,
}

/// Sink writing a pyramid onto local disk.
pub type FileSystemSink = PyramidSink<FileSystemStore>;

impl FileSystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a `/`-separated key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
        Some(segments?.join("/"))
    }
}

impl BlobStore for FileSystemStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::io(parent.display().to_string(), e))?;
        }
        fs::write(&path, &bytes).map_err(|e| StorageError::io(path.display().to_string(), e))?;
        debug!(path = %path.display(), size = bytes.len(), "Wrote file");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
            _ => StorageError::io(path.display().to_string(), e),
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        // Walk from the deepest directory fully named by the prefix.
        let dir_prefix = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = self.path_for(dir_prefix);
        if !start.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&start) {
            let entry = entry.map_err(|e| {
                StorageError::io(
                    start.display().to_string(),
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = self.key_for(entry.path()) else {
                continue;
            };
            if key.starts_with(prefix) {
                let size = entry
                    .metadata()
                    .map(|m| m.len())
                    .map_err(|e| StorageError::io(entry.path().display().to_string(), e.into()))?;
                entries.push(BlobEntry { key, size });
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
