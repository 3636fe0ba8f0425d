//! In-process object store.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use super::{validate_key, ObjectStore, StorageError};

/// Object store backed by a concurrent map.
///
/// Clones share the same contents. Failures can be injected per key to
/// exercise retry and abort paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<DashMap<(String, String), Bytes>>,
    failures: Arc<DashMap<String, (StorageError, usize)>>,
    puts: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing failure injection.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.objects
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// Read an object directly.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Sorted keys stored in `bucket` under `prefix`.
    pub fn keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket && entry.key().1.starts_with(prefix))
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of objects across all buckets.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    /// Make the next `times` calls touching `key` fail with `error`.
    pub fn fail_key(&self, key: &str, error: StorageError, times: usize) {
        self.failures.insert(key.to_string(), (error, times));
    }

    fn injected_failure(&self, key: &str) -> Option<StorageError> {
        let mut entry = self.failures.get_mut(key)?;
        let (error, remaining) = entry.value_mut();
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(error.clone())
    }
}

#[allow(clippy::manual_async_fn)]
impl ObjectStore for MemoryObjectStore {
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Bytes, StorageError>> + Send {
        async move {
            validate_key(bucket, key)?;
            if let Some(error) = self.injected_failure(key) {
                return Err(error);
            }
            self.object(bucket, key).ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        async move {
            validate_key(bucket, key)?;
            if let Some(error) = self.injected_failure(key) {
                return Err(error);
            }
            self.insert(bucket, key, body);
            self.puts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }
}
