//! Source asset retrieval.
//!
//! Every name in an [`AssetManifest`] is read from
//! `<prefix>-console-data-management/stickers/<packageId>/<name>.png`.
//! Fetches run concurrently up to a configured limit; the first failure
//! drops every other in-flight fetch and no partial map is returned.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};
use crate::layout::AssetManifest;
use crate::retry::{call_with_retry, CallError, RetryPolicy};
use crate::storage::ObjectStore;

/// Object key of a source asset.
pub fn asset_key(package_id: &str, name: &str) -> String {
    format!("stickers/{}/{}.png", package_id, name)
}

/// Fetches source artwork for one package.
#[derive(Debug, Clone)]
pub struct AssetFetcher {
    retry: RetryPolicy,
    deadline: Duration,
    concurrency: usize,
}

impl AssetFetcher {
    pub fn new(retry: RetryPolicy, deadline: Duration, concurrency: usize) -> Self {
        Self {
            retry,
            deadline,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch every manifest entry from `bucket`.
    ///
    /// Fails with `MissingAsset` on the first asset that cannot be read
    /// after retries, or `Cancelled` if `cancel` fires.
    pub async fn fetch<S: ObjectStore>(
        &self,
        store: &S,
        bucket: &str,
        package_id: &str,
        manifest: &AssetManifest,
        cancel: &CancellationToken,
    ) -> PipelineResult<HashMap<String, Bytes>> {
        tracing::info!(bucket, package_id, assets = manifest.len(), "Fetching source assets");

        let assets: HashMap<String, Bytes> = stream::iter(manifest.names())
            .map(|name| async move {
                let key = asset_key(package_id, name);
                let body = call_with_retry(&self.retry, self.deadline, cancel, bucket, &key, || {
                    store.get(bucket, &key)
                })
                .await
                .map_err(|e| match e {
                    CallError::Cancelled => {
                        PipelineError::cancelled(format!("fetch of '{}'", name))
                    }
                    CallError::Storage { error, attempts } => {
                        tracing::warn!(bucket, key = %key, attempts, error = %error, "Asset fetch failed");
                        PipelineError::missing_asset(name, error)
                    }
                })?;
                tracing::debug!(key = %key, bytes = body.len(), "Fetched asset");
                Ok::<_, PipelineError>((name.clone(), body))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        Ok(assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::layout::{BoxGroup, Layout, StickerPlacement};
    use crate::storage::{MemoryObjectStore, StorageError};

    const BUCKET: &str = "acme-console-data-management";

    fn manifest() -> AssetManifest {
        Layout::new(vec![BoxGroup::new(
            "g",
            vec![StickerPlacement::new("cat", 0, 0, 1, 1)],
        )])
        .unwrap()
        .required_manifest()
    }

    fn seeded_store() -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        for name in manifest().names() {
            store.insert(BUCKET, &asset_key("P1", name), name.clone().into_bytes());
        }
        store
    }

    fn fetcher() -> AssetFetcher {
        AssetFetcher::new(RetryPolicy::fixed(2, Duration::from_millis(1)), Duration::from_secs(5), 4)
    }

    #[test]
    fn test_asset_key() {
        assert_eq!(asset_key("P1", "cat"), "stickers/P1/cat.png");
    }

    #[tokio::test]
    async fn test_fetch_all() {
        let store = seeded_store();
        let assets = fetcher()
            .fetch(&store, BUCKET, "P1", &manifest(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(assets.len(), 6);
        assert_eq!(&assets["cat"][..], b"cat");
        assert!(manifest().missing_from(&assets).is_empty());
    }

    #[tokio::test]
    async fn test_missing_asset_fails_whole_fetch() {
        let store = MemoryObjectStore::new();
        store.insert(BUCKET, &asset_key("P1", "icon"), Bytes::from_static(b"icon"));

        let err = fetcher()
            .fetch(&store, BUCKET, "P1", &manifest(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingAsset);
        assert_eq!(err.tag(), "MISSING_ASSET");
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = seeded_store();
        store.fail_key(&asset_key("P1", "cat"), StorageError::Transport("reset".into()), 1);

        let assets = fetcher()
            .fetch(&store, BUCKET, "P1", &manifest(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(assets.contains_key("cat"));
    }

    #[tokio::test]
    async fn test_cancelled_fetch() {
        let store = seeded_store();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher()
            .fetch(&store, BUCKET, "P1", &manifest(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
