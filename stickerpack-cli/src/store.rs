//! Object store selected by configuration.

use std::future::Future;

use bytes::Bytes;
use stickerpack::config::{StorageBackend, StorageSettings};
use stickerpack::storage::{LocalObjectStore, ObjectStore, S3ObjectStore, StorageError};

/// The backend named in `[storage] backend`.
#[derive(Debug)]
pub enum CliStore {
    Local(LocalObjectStore),
    S3(S3ObjectStore),
}

impl CliStore {
    /// Store for source reads and primary uploads.
    pub fn primary(settings: &StorageSettings) -> Result<Self, StorageError> {
        Self::connect(settings, settings.endpoint.as_deref())
    }

    /// Store for the mirror destination.
    ///
    /// Uses `mirror_endpoint` when set, otherwise the primary endpoint.
    pub fn mirror(settings: &StorageSettings) -> Result<Self, StorageError> {
        let endpoint = settings
            .mirror_endpoint
            .as_deref()
            .or(settings.endpoint.as_deref());
        Self::connect(settings, endpoint)
    }

    fn connect(settings: &StorageSettings, endpoint: Option<&str>) -> Result<Self, StorageError> {
        match settings.backend {
            StorageBackend::Local => Ok(CliStore::Local(LocalObjectStore::new(&settings.root))),
            StorageBackend::S3 => {
                let mut store = S3ObjectStore::new().with_allow_http(settings.allow_http);
                if let Some(endpoint) = endpoint {
                    if endpoint.starts_with("http://") && !settings.allow_http {
                        return Err(StorageError::Config(format!(
                            "endpoint {} is plain http; set storage.allow_http = true",
                            endpoint
                        )));
                    }
                    store = store.with_endpoint(endpoint);
                }
                if let Some(region) = &settings.region {
                    store = store.with_region(region);
                }
                Ok(CliStore::S3(store))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CliStore::Local(store) => format!("local:{}", store.root().display()),
            CliStore::S3(store) => format!("s3:{}", store.endpoint().unwrap_or("aws")),
        }
    }
}

#[allow(clippy::manual_async_fn)]
impl ObjectStore for CliStore {
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Bytes, StorageError>> + Send {
        async move {
            match self {
                CliStore::Local(store) => store.get(bucket, key).await,
                CliStore::S3(store) => store.get(bucket, key).await,
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
            match self {
                CliStore::Local(store) => store.put(bucket, key, body).await,
                CliStore::S3(store) => store.put(bucket, key, body).await,
            }
        }
    }
}
