use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::BlobError;

/// Read access to the blob storage holding documents and analysis JSON.
/// Paths are `/`-separated and relative to the storage root.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Bytes, BlobError>;
}

pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, path: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.trim().is_empty() || escapes {
            return Err(BlobError::InvalidPath(path.to_owned()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn fetch(&self, path: &str) -> Result<Bytes, BlobError> {
        let full = self.blob_path(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(path.to_owned()))
            }
            Err(source) => Err(BlobError::Io {
                path: path.to_owned(),
                source,
            }),
        }
    }
}

pub struct MemoryBlobStore {
    inner: Mutex<HashMap<String, Bytes>>,
    fetches: Mutex<Vec<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.inner.lock().insert(path.into(), data.into());
    }

    pub fn insert_json(&self, path: impl Into<String>, value: &serde_json::Value) {
        self.insert(path, value.to_string());
    }

    pub fn fetch_log(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, path: &str) -> Result<Bytes, BlobError> {
        self.fetches.lock().push(path.to_owned());
        self.inner
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.to_owned()))
    }
}
