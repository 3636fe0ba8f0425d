//! Uploads built archive trees to object storage.
//!
//! A platform tree is uploaded file by file, keyed by its path relative to
//! the tree root under the destination prefix:
//!
//! ```text
//! <work_dir>/PK1/hdpi/PK1.zip      ->  <bucket>/android/PK1/hdpi/PK1.zip
//! <work_dir>/PK1_IOS/x2/PK1.zip    ->  <bucket>/ios/PK1/x2/PK1.zip
//! ```
//!
//! Keys are a pure function of the package number, so publishing the same
//! build twice overwrites the same objects. The first failed upload aborts
//! the rest of the call; objects already written stay in place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::builder::WorkingTree;
use crate::error::{ErrorKind, PipelineError, PipelineResult, Platform};
use crate::retry::{call_with_retry, CallError, RetryPolicy};
use crate::storage::{ObjectStore, StorageLocation};

/// Where both platform trees of a package land in one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLocations {
    pub ios: StorageLocation,
    pub android: StorageLocation,
}

impl PlatformLocations {
    /// Primary layout: `android/<pn>` and `ios/<pn>`.
    pub fn primary(bucket: &str, package_number: &str) -> Self {
        Self::with_prefix(bucket, None, package_number)
    }

    /// Mirror layout: `<brand>/android/<pn>` and `<brand>/ios/<pn>`.
    pub fn mirror(bucket: &str, brand: &str, package_number: &str) -> Self {
        Self::with_prefix(bucket, Some(brand), package_number)
    }

    fn with_prefix(bucket: &str, brand: Option<&str>, package_number: &str) -> Self {
        let prefix = |platform: Platform| match brand {
            Some(brand) => format!("{}/{}/{}", brand, platform.key_segment(), package_number),
            None => format!("{}/{}", platform.key_segment(), package_number),
        };
        Self {
            ios: StorageLocation::new(bucket, prefix(Platform::Ios)),
            android: StorageLocation::new(bucket, prefix(Platform::Android)),
        }
    }

    pub fn for_platform(&self, platform: Platform) -> &StorageLocation {
        match platform {
            Platform::Android => &self.android,
            Platform::Ios => &self.ios,
        }
    }
}

/// A local file and the key suffix it is uploaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    pub relative: String,
    pub path: PathBuf,
}

/// Files below `root`, sorted, with `/`-separated relative names.
pub fn collect_tree(root: &Path) -> PipelineResult<Vec<TreeFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            PipelineError::new(ErrorKind::Upload, format!("failed to walk {}", root.display()))
                .with_source(e)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push(TreeFile {
            relative,
            path: entry.path().to_path_buf(),
        });
    }
    Ok(files)
}

/// Uploads local trees with bounded concurrency and retry.
#[derive(Debug, Clone)]
pub struct Publisher {
    retry: RetryPolicy,
    deadline: Duration,
    concurrency: usize,
}

impl Publisher {
    pub fn new(retry: RetryPolicy, deadline: Duration, concurrency: usize) -> Self {
        Self {
            retry,
            deadline,
            concurrency: concurrency.max(1),
        }
    }

    /// Upload both platform trees of `tree` to `locations`, concurrently.
    pub async fn publish_tree<S: ObjectStore>(
        &self,
        store: &S,
        tree: &WorkingTree,
        locations: &PlatformLocations,
        cancel: &CancellationToken,
    ) -> PipelineResult<usize> {
        let (android, ios) = tokio::try_join!(
            self.upload_platform(store, tree, Platform::Android, locations, cancel),
            self.upload_platform(store, tree, Platform::Ios, locations, cancel),
        )?;
        Ok(android + ios)
    }

    async fn upload_platform<S: ObjectStore>(
        &self,
        store: &S,
        tree: &WorkingTree,
        platform: Platform,
        locations: &PlatformLocations,
        cancel: &CancellationToken,
    ) -> PipelineResult<usize> {
        self.upload_directory(store, &tree.root(platform), locations.for_platform(platform), cancel)
            .await
            .map_err(|e| e.on(platform))
    }

    /// Upload every file below `root` to `location`.
    ///
    /// Returns the number of objects written.
    pub async fn upload_directory<S: ObjectStore>(
        &self,
        store: &S,
        root: &Path,
        location: &StorageLocation,
        cancel: &CancellationToken,
    ) -> PipelineResult<usize> {
        let owned_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_tree(&owned_root))
            .await
            .map_err(|e| PipelineError::new(ErrorKind::Upload, format!("tree walk aborted: {}", e)))??;

        let count = files.len();
        tracing::info!(
            bucket = %location.bucket,
            prefix = %location.prefix,
            files = count,
            "Uploading tree"
        );

        stream::iter(files)
            .map(|file| self.upload_file(store, file, location, cancel))
            .buffer_unordered(self.concurrency)
            .try_for_each(|_| futures::future::ready(Ok(())))
            .await?;

        Ok(count)
    }

    async fn upload_file<S: ObjectStore>(
        &self,
        store: &S,
        file: TreeFile,
        location: &StorageLocation,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let body = Bytes::from(
            tokio::fs::read(&file.path)
                .await
                .map_err(|e| PipelineError::io(ErrorKind::Upload, "read", &file.path, e))?,
        );
        let bucket = location.bucket.as_str();
        let key = location.key_for(&file.relative);

        call_with_retry(&self.retry, self.deadline, cancel, bucket, &key, || {
            store.put(bucket, &key, body.clone())
        })
        .await
        .map_err(|e| match e {
            CallError::Cancelled => PipelineError::cancelled(format!("upload of {}", key)),
            CallError::Storage { error, attempts } => {
                tracing::warn!(bucket, key = %key, attempts, error = %error, "Upload failed");
                PipelineError::upload(bucket, &key, error)
            }
        })?;

        tracing::debug!(bucket, key = %key, bytes = body.len(), "Uploaded object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryObjectStore, StorageError};
    use std::fs;

    fn publisher() -> Publisher {
        Publisher::new(RetryPolicy::fixed(2, Duration::from_millis(1)), Duration::from_secs(5), 4)
    }

    fn staged_tree(root: &Path) -> WorkingTree {
        let tree = WorkingTree::new(root, "PK1");
        fs::create_dir_all(tree.tiered_root().join("hdpi")).unwrap();
        fs::write(tree.tiered_root().join("hdpi/PK1.zip"), b"a").unwrap();
        fs::write(tree.tiered_root().join("hdpi/icon.png"), b"i").unwrap();
        fs::create_dir_all(tree.scaled_root().join("x1")).unwrap();
        fs::write(tree.scaled_root().join("x1/PK1.zip"), b"b").unwrap();
        fs::write(tree.scaled_root().join("x1/settings.json"), b"{}").unwrap();
        tree
    }

    #[test]
    fn test_locations() {
        let primary = PlatformLocations::primary("acme-sticker-packages", "PK1");
        assert_eq!(primary.android.prefix, "android/PK1");
        assert_eq!(primary.ios.prefix, "ios/PK1");

        let mirror = PlatformLocations::mirror("whitelabel", "brandx", "PK1");
        assert_eq!(mirror.android.prefix, "brandx/android/PK1");
        assert_eq!(mirror.ios.bucket, "whitelabel");
    }

    #[test]
    fn test_collect_tree_relative_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let tree = staged_tree(dir.path());
        let names: Vec<String> = collect_tree(&tree.scaled_root())
            .unwrap()
            .into_iter()
            .map(|f| f.relative)
            .collect();
        assert_eq!(names, vec!["x1/PK1.zip", "x1/settings.json"]);
    }

    #[tokio::test]
    async fn test_publish_tree_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let tree = staged_tree(dir.path());
        let store = MemoryObjectStore::new();
        let locations = PlatformLocations::primary("acme-sticker-packages", "PK1");

        let written = publisher()
            .publish_tree(&store, &tree, &locations, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(written, 4);
        assert_eq!(
            store.keys("acme-sticker-packages", ""),
            vec![
                "android/PK1/hdpi/PK1.zip",
                "android/PK1/hdpi/icon.png",
                "ios/PK1/x1/PK1.zip",
                "ios/PK1/x1/settings.json",
            ]
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_aborts() {
        let dir = tempfile::TempDir::new().unwrap();
        let tree = staged_tree(dir.path());
        let store = MemoryObjectStore::new();
        store.fail_key(
            "ios/PK1/x1/PK1.zip",
            StorageError::Rejected {
                status: 403,
                message: "denied".into(),
            },
            10,
        );
        let locations = PlatformLocations::primary("acme-sticker-packages", "PK1");

        let err = publisher()
            .publish_tree(&store, &tree, &locations, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "STICKER_UPLOAD_ERROR");
        assert_eq!(err.platform(), Some(Platform::Ios));
    }

    #[tokio::test]
    async fn test_missing_root_uploads_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MemoryObjectStore::new();
        let err = publisher()
            .upload_directory(
                &store,
                &dir.path().join("absent"),
                &StorageLocation::new("b", "ios/PK1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upload);
        assert!(store.is_empty());
    }
}
