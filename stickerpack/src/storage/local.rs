//! Filesystem-backed object store.
//!
//! Maps `bucket/key` onto `<root>/<bucket>/<key>`. Useful for local
//! development and for staging a publish without network access.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::{validate_key, ObjectStore, StorageError};

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(bucket, key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

#[allow(clippy::manual_async_fn)]
impl ObjectStore for LocalObjectStore {
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Bytes, StorageError>> + Send {
        async move {
            let path = self.object_path(bucket, key)?;
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }),
                Err(e) => Err(StorageError::Io(format!("{}: {}", path.display(), e))),
            }
        }
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        async move {
            let path = self.object_path(bucket, key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::Io(format!("{}: {}", parent.display(), e)))?;
            }
            tokio::fs::write(&path, &body)
                .await
                .map_err(|e| StorageError::Io(format!("{}: {}", path.display(), e)))
        }
    }
}
