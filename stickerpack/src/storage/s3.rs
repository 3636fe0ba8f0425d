//! S3 object store.
//!
//! Backed by the `object_store` crate's AWS client, one client per bucket.
//! Credentials, region and request signing come from the client's standard
//! resolution ([`AmazonS3Builder::from_env`]: `AWS_*` environment variables,
//! web identity, instance metadata). This store only picks the bucket and,
//! for S3-compatible services, the endpoint.
//!
//! The client's own retries are disabled; [`call_with_retry`](crate::retry)
//! owns retries and deadlines for every pipeline call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore as _, PutOptions, PutPayload, RetryConfig,
};

use super::{validate_key, ObjectStore, StorageError};

/// Default timeout for a single request in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Object store reached through the S3 API.
#[derive(Debug)]
pub struct S3ObjectStore {
    endpoint: Option<String>,
    region: Option<String>,
    allow_http: bool,
    timeout: Duration,
    clients: DashMap<String, Arc<AmazonS3>>,
}

impl Default for S3ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl S3ObjectStore {
    /// Store using the environment's endpoint, region and credentials.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            region: None,
            allow_http: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            clients: DashMap::new(),
        }
    }

    /// Address an S3-compatible service instead of AWS.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Permit plain `http://` endpoints, e.g. a local MinIO.
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Number of buckets a client has been built for.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// The client for `bucket`, built on first use.
    fn client(&self, bucket: &str) -> Result<Arc<AmazonS3>, StorageError> {
        if let Some(client) = self.clients.get(bucket) {
            return Ok(Arc::clone(client.value()));
        }
        let client = self
            .clients
            .entry(bucket.to_string())
            .or_try_insert_with(|| self.build_client(bucket).map(Arc::new))?;
        Ok(Arc::clone(client.value()))
    }

    fn build_client(&self, bucket: &str) -> Result<AmazonS3, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_allow_http(self.allow_http)
            .with_client_options(ClientOptions::new().with_timeout(self.timeout))
            .with_retry(RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            });
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }

        tracing::debug!(bucket, endpoint = self.endpoint.as_deref().unwrap_or("aws"), "Building S3 client");
        builder
            .build()
            .map_err(|e| StorageError::Config(format!("S3 client for bucket {}: {}", bucket, e)))
    }
}

fn object_path(bucket: &str, key: &str) -> Result<ObjectPath, StorageError> {
    validate_key(bucket, key)?;
    ObjectPath::parse(key).map_err(|e| StorageError::Rejected {
        status: 400,
        message: format!("invalid object key {}: {}", key, e),
    })
}

/// Map a client error onto the pipeline's retry classification.
fn storage_error(bucket: &str, key: &str, e: object_store::Error) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        object_store::Error::Unauthenticated { .. } => StorageError::Rejected {
            status: 401,
            message: e.to_string(),
        },
        object_store::Error::PermissionDenied { .. } => StorageError::Rejected {
            status: 403,
            message: e.to_string(),
        },
        object_store::Error::InvalidPath { .. } => StorageError::Rejected {
            status: 400,
            message: e.to_string(),
        },
        // connection failures and server errors surface as generic errors
        object_store::Error::Generic { .. } => StorageError::Transport(e.to_string()),
        other => StorageError::Rejected {
            status: 409,
            message: other.to_string(),
        },
    }
}

#[allow(clippy::manual_async_fn)]
impl ObjectStore for S3ObjectStore {
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Bytes, StorageError>> + Send {
        async move {
            let path = object_path(bucket, key)?;
            let client = self.client(bucket)?;
            let result = client
                .get(&path)
                .await
                .map_err(|e| storage_error(bucket, key, e))?;
            result.bytes().await.map_err(|e| storage_error(bucket, key, e))
        }
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        async move {
            let path = object_path(bucket, key)?;
            let client = self.client(bucket)?;

            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, content_type_for(key).into());
            let options = PutOptions {
                attributes,
                ..PutOptions::default()
            };

            client
                .put_opts(&path, PutPayload::from(body), options)
                .await
                .map_err(|e| storage_error(bucket, key, e))?;
            Ok(())
        }
    }
}

/// Content type from the key's extension.
fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_store() -> S3ObjectStore {
        S3ObjectStore::new()
            .with_endpoint("http://127.0.0.1:9000/")
            .with_region("us-east-1")
            .with_allow_http(true)
    }

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        assert_eq!(local_store().endpoint(), Some("http://127.0.0.1:9000"));
        assert_eq!(S3ObjectStore::new().endpoint(), None);
    }

    #[test]
    fn test_one_client_per_bucket() {
        let store = local_store();
        let first = store.client("acme-sticker-packages").unwrap();
        let again = store.client("acme-sticker-packages").unwrap();
        store.client("legacy-stickers").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(store.client_count(), 2);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("ios/PK/x1/PK.zip"), "application/zip");
        assert_eq!(content_type_for("ios/PK/x1/settings.json"), "application/json");
        assert_eq!(content_type_for("android/PK/xxxhdpi/preview.jpg"), "image/jpeg");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }

    #[test]
    fn test_error_classification() {
        let not_found = object_store::Error::NotFound {
            path: "stickers/p/cat.png".to_string(),
            source: "missing".into(),
        };
        assert_eq!(
            storage_error("b", "stickers/p/cat.png", not_found),
            StorageError::NotFound {
                bucket: "b".to_string(),
                key: "stickers/p/cat.png".to_string()
            }
        );

        let denied = object_store::Error::PermissionDenied {
            path: "k".to_string(),
            source: "AccessDenied".into(),
        };
        let err = storage_error("b", "k", denied);
        assert!(matches!(err, StorageError::Rejected { status: 403, .. }));
        assert!(!err.is_retryable());

        let generic = object_store::Error::Generic {
            store: "S3",
            source: "connection reset".into(),
        };
        assert!(storage_error("b", "k", generic).is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_request() {
        let store = local_store();
        let err = store.get("bucket", "../x").await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected { status: 400, .. }));
        assert_eq!(store.client_count(), 0);
    }
}
