//! Object storage abstraction.
//!
//! The pipeline reads source artwork from, and publishes archives to, an
//! object store addressed by bucket and key. The [`ObjectStore`] trait is the
//! only seam the pipeline depends on; credential handling belongs to the
//! implementation.
//!
//! # Implementations
//!
//! - [`MemoryObjectStore`] - in-process map, for tests and dry runs
//! - [`LocalObjectStore`] - one directory per bucket on local disk
//! - [`S3ObjectStore`] - S3 API with the standard AWS credential chain

mod local;
mod memory;
mod s3;

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// Errors reported by an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The object does not exist.
    NotFound { bucket: String, key: String },
    /// The call did not complete within its deadline.
    Timeout { bucket: String, key: String },
    /// The store answered with a non-success status.
    Rejected { status: u16, message: String },
    /// The request could not be delivered.
    Transport(String),
    /// Local I/O failed.
    Io(String),
    /// The store could not be set up.
    Config(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Timeout { .. } | StorageError::Transport(_) => true,
            StorageError::Rejected { status, .. } => *status >= 500 || *status == 429,
            StorageError::NotFound { .. } | StorageError::Io(_) | StorageError::Config(_) => false,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound { bucket, key } => {
                write!(f, "object not found: {}/{}", bucket, key)
            }
            StorageError::Timeout { bucket, key } => {
                write!(f, "timed out accessing {}/{}", bucket, key)
            }
            StorageError::Rejected { status, message } => {
                write!(f, "store rejected request (HTTP {}): {}", status, message)
            }
            StorageError::Transport(msg) => write!(f, "transport error: {}", msg),
            StorageError::Io(msg) => write!(f, "I/O error: {}", msg),
            StorageError::Config(msg) => write!(f, "store configuration error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// Async object store operations.
///
/// Futures must be `Send` so the pipeline can drive them from any runtime
/// worker.
pub trait ObjectStore: Send + Sync {
    /// Read an object.
    fn get(&self, bucket: &str, key: &str)
        -> impl Future<Output = Result<Bytes, StorageError>> + Send;

    /// Create or overwrite an object.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Where a platform's archive tree was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub prefix: String,
}

impl StorageLocation {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Key for a path relative to this location.
    pub fn key_for(&self, relative: &str) -> String {
        format!("{}/{}", self.prefix.trim_end_matches('/'), relative)
    }
}

/// Reject keys that would escape a bucket when mapped onto a filesystem.
pub(crate) fn validate_key(bucket: &str, key: &str) -> Result<(), StorageError> {
    let bad_segment = key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bucket.is_empty() || bucket.contains('/') || key.is_empty() || bad_segment {
        return Err(StorageError::Rejected {
            status: 400,
            message: format!("invalid object address {}/{}", bucket, key),
        });
    }
    Ok(())
}
