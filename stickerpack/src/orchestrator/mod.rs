//! Build and publish orchestration
//!
//! [`StickerPipeline`] sequences the two externally invoked operations:
//!
//! - `build`: fetch source artwork, check it against the layout's required
//!   manifest, then run the scaled and tiered builders concurrently. On
//!   success both working trees hold their archives.
//! - `publish`: upload both working trees to the tenant's package bucket
//!   (and to the white-label mirror when one is configured), then remove the
//!   trees.
//!
//! Working trees are addressed by package number only, so operations on the
//! same package are serialized by a per-package lock. Different packages run
//! independently.

mod types;

pub use types::{BuildReport, PackageState, PublishOutcome};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::builder::{ScaledBuilder, SourceSet, TieredBuilder, WorkingTree};
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::fetch::AssetFetcher;
use crate::limiter::ImageWorkers;
use crate::package::{StickerPackage, Tenant};
use crate::publisher::{PlatformLocations, Publisher};
use crate::storage::ObjectStore;

/// The sticker package pipeline.
///
/// Generic over the object store so tests can run against
/// [`MemoryObjectStore`](crate::storage::MemoryObjectStore). The optional
/// mirror store is only used when the configuration names a mirror.
pub struct StickerPipeline<S: ObjectStore> {
    store: S,
    mirror_store: Option<S>,
    config: PipelineConfig,
    cancel: CancellationToken,
    workers: ImageWorkers,
    fetcher: AssetFetcher,
    publisher: Publisher,
    locks: DashMap<String, Arc<Mutex<()>>>,
    states: DashMap<String, PackageState>,
}

impl<S: ObjectStore> StickerPipeline<S> {
    pub fn new(store: S, config: PipelineConfig) -> Self {
        let cancel = CancellationToken::new();
        let retry = config.retry_policy();
        let workers = ImageWorkers::new(config.image_workers, cancel.clone());
        let fetcher = AssetFetcher::new(retry.clone(), config.fetch_timeout, config.fetch_concurrency);
        let publisher = Publisher::new(retry, config.upload_timeout, config.upload_concurrency);

        tracing::info!(
            work_dir = %config.work_dir.display(),
            image_workers = workers.permits(),
            mirror = config.mirror.as_ref().map(|m| m.brand.as_str()).unwrap_or("none"),
            "Sticker pipeline ready"
        );

        Self {
            store,
            mirror_store: None,
            config,
            cancel,
            workers,
            fetcher,
            publisher,
            locks: DashMap::new(),
            states: DashMap::new(),
        }
    }

    /// Store used for the white-label mirror destination.
    pub fn with_mirror_store(mut self, store: S) -> Self {
        self.mirror_store = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token observed by every fetch, upload and image job of this pipeline.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel all running and future operations of this pipeline.
    pub fn cancel(&self) {
        tracing::info!("Pipeline cancellation requested");
        self.cancel.cancel();
    }

    /// Last known state of a package.
    pub fn state(&self, package_number: &str) -> PackageState {
        self.states
            .get(package_number)
            .map(|s| *s.value())
            .unwrap_or_default()
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Build both platform trees for `package`.
    ///
    /// Fails before touching the working tree if the layout is invalid,
    /// any required asset is missing or a fetched asset is empty. A
    /// failure after the trees were
    /// created removes them again.
    pub async fn build(&self, tenant: &Tenant, package: &StickerPackage) -> PipelineResult<BuildReport> {
        check_tenant(tenant)?;
        package.validate()?;
        let pn = package.package_number.as_str();
        let _guard = self.lock_package(pn).await?;

        self.transition(pn, PackageState::Building);
        let result = self.run_build(tenant, package).await;
        match &result {
            Ok(report) => {
                tracing::info!(
                    package = pn,
                    archives = report.artifacts.len(),
                    bytes = report.total_size(),
                    "Build complete"
                );
                self.transition(pn, PackageState::Built);
            }
            Err(e) => {
                tracing::error!(package = pn, tag = e.tag(), error = %e, "Build failed");
                self.transition(pn, PackageState::Failed(e.kind()));
            }
        }
        result
    }

    async fn run_build(&self, tenant: &Tenant, package: &StickerPackage) -> PipelineResult<BuildReport> {
        let pn = package.package_number.clone();
        let layout = &package.coordinates;
        let manifest = layout.required_manifest();
        let sticker_count = layout.normalize().sticker_count();

        let cancel = self.cancel.child_token();
        let source_bucket = self.config.source_bucket(tenant.prefix());
        let mut buffers = self
            .fetcher
            .fetch(&self.store, &source_bucket, &package.package_id, &manifest, &cancel)
            .await?;

        // a zero-length object is an upload that never completed
        buffers.retain(|name, body| {
            if body.is_empty() {
                tracing::warn!(package = %pn, asset = %name, "Source asset is empty");
            }
            !body.is_empty()
        });
        let missing = manifest.missing_from(&buffers);
        if !missing.is_empty() {
            return Err(PipelineError::invalid_files(&missing));
        }

        let workers = self.workers.scoped(cancel.clone());
        let sources = workers
            .run(format!("decode {}", pn), move || SourceSet::decode(&buffers))
            .await?;

        let tree = WorkingTree::new(&self.config.work_dir, &pn);
        let stale = tree.clone();
        workers.run(format!("clear {}", pn), move || stale.clear()).await?;

        let scaled = ScaledBuilder::new(workers.clone());
        let tiered = TieredBuilder::new(workers.clone());
        let built = tokio::try_join!(
            tiered.build(&tree, layout, &sources),
            scaled.build(&tree, layout, &sources),
        );

        let (android, ios) = match built {
            Ok(artifacts) => artifacts,
            Err(e) => {
                // renders and folds of the other platform may still be writing
                cancel.cancel();
                workers.wait_idle().await;
                remove_tree(tree).await;
                return Err(e);
            }
        };

        Ok(BuildReport {
            package_number: pn,
            sticker_count,
            artifacts: android.into_iter().chain(ios).collect(),
            built_at: chrono::Utc::now(),
        })
    }

    // =========================================================================
    // Publish
    // =========================================================================

    /// Upload a built package and remove its working trees.
    ///
    /// Requires a completed build of the same package number in the work
    /// directory, otherwise fails with `NotBuilt`. Uploads are not rolled
    /// back when a later one fails; publishing again overwrites the same
    /// keys.
    pub async fn publish(&self, tenant: &Tenant, package: &StickerPackage) -> PipelineResult<PublishOutcome> {
        check_tenant(tenant)?;
        package.validate()?;
        let pn = package.package_number.as_str();
        let _guard = self.lock_package(pn).await?;

        self.transition(pn, PackageState::Publishing);
        let result = self.run_publish(tenant, pn).await;
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    package = pn,
                    bucket = %outcome.android.bucket,
                    mirrored = outcome.mirror.is_some(),
                    "Publish complete"
                );
                self.transition(pn, PackageState::Published);
            }
            Err(e) => {
                tracing::error!(package = pn, tag = e.tag(), error = %e, "Publish failed");
                self.transition(pn, PackageState::Failed(e.kind()));
            }
        }
        result
    }

    async fn run_publish(&self, tenant: &Tenant, pn: &str) -> PipelineResult<PublishOutcome> {
        let tree = WorkingTree::new(&self.config.work_dir, pn);
        let missing = tree.missing_archives();
        if !missing.is_empty() {
            tracing::debug!(package = pn, missing = missing.len(), "Archives missing from working tree");
            return Err(PipelineError::not_built(pn));
        }

        let bucket = self.config.package_bucket(tenant.prefix());
        let primary = PlatformLocations::primary(&bucket, pn);
        let mirror = match (&self.config.mirror, &self.mirror_store) {
            (Some(mirror), Some(store)) => Some((store, PlatformLocations::mirror(&mirror.bucket, &mirror.brand, pn))),
            (Some(mirror), None) => {
                tracing::warn!(brand = %mirror.brand, "Mirror configured without a mirror store, skipping");
                None
            }
            (None, _) => None,
        };

        let cancel = self.cancel.child_token();
        let mirror_upload = async {
            match &mirror {
                Some((store, locations)) => self
                    .publisher
                    .publish_tree(*store, &tree, locations, &cancel)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let (uploaded, mirrored) = tokio::try_join!(
            self.publisher.publish_tree(&self.store, &tree, &primary, &cancel),
            mirror_upload,
        )?;
        tracing::debug!(package = pn, uploaded, mirrored = mirrored.unwrap_or(0), "Objects written");

        remove_tree(tree).await;

        Ok(PublishOutcome {
            ios: primary.ios,
            android: primary.android,
            mirror: mirror.map(|(_, locations)| locations),
        })
    }

    // =========================================================================
    // Per-package bookkeeping
    // =========================================================================

    async fn lock_package(&self, pn: &str) -> PipelineResult<PackageGuard<'_>> {
        let lock = Arc::clone(self.locks.entry(pn.to_string()).or_default().value());
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                drop(lock);
                release_lock(&self.locks, pn);
                Err(PipelineError::cancelled(format!("waiting for package {}", pn)))
            }
            guard = lock.clone().lock_owned() => Ok(PackageGuard {
                locks: &self.locks,
                package: pn.to_string(),
                guard: Some(guard),
            }),
        }
    }

    /// Drop the recorded state of a package that is not being worked on.
    ///
    /// Returns the state that was recorded, if any.
    pub fn forget(&self, package_number: &str) -> Option<PackageState> {
        self.states
            .remove_if(package_number, |_, state| !state.is_busy())
            .map(|(_, state)| state)
    }

    fn transition(&self, pn: &str, next: PackageState) {
        let mut state = self.states.entry(pn.to_string()).or_default();
        if !state.can_transition_to(next) {
            tracing::warn!(package = pn, from = %*state, to = %next, "Unexpected state transition");
        }
        tracing::debug!(package = pn, from = %*state, to = %next, "Package state");
        *state = next;
    }
}

/// Holds a package's lock; the table entry goes away with the last holder.
struct PackageGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    package: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PackageGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        release_lock(self.locks, &self.package);
    }
}

/// Remove a lock entry that only the table still references.
fn release_lock(locks: &DashMap<String, Arc<Mutex<()>>>, pn: &str) {
    locks.remove_if(pn, |_, lock| Arc::strong_count(lock) == 1);
}

fn check_tenant(tenant: &Tenant) -> PipelineResult<()> {
    let prefix = tenant.prefix();
    if prefix.is_empty() || prefix.contains('/') {
        return Err(PipelineError::new(
            ErrorKind::Config,
            format!("invalid tenant prefix '{}'", prefix),
        ));
    }
    Ok(())
}

/// Remove both working trees off the runtime; failures are only logged.
async fn remove_tree(tree: WorkingTree) {
    let pn = tree.package_number().to_string();
    match tokio::task::spawn_blocking(move || tree.remove_best_effort()).await {
        Ok(failed) if failed.is_empty() => tracing::debug!(package = %pn, "Working tree removed"),
        Ok(failed) => tracing::warn!(package = %pn, remaining = failed.len(), "Working tree partly removed"),
        Err(e) => tracing::warn!(package = %pn, error = %e, "Working tree removal aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BoxGroup, Layout, StickerPlacement, FIXED_ASSETS};
    use crate::storage::MemoryObjectStore;
    use crate::{fetch::asset_key, imaging};
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::time::Duration;
    use tempfile::TempDir;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([200, 40, 90, 255]));
        imaging::encode_png(&DynamicImage::ImageRgba8(image)).unwrap()
    }

    fn package(pn: &str) -> StickerPackage {
        let layout = Layout::new(vec![BoxGroup::new(
            "g",
            vec![StickerPlacement::new("cat", 0, 4, 1, 1)],
        )])
        .unwrap();
        StickerPackage::new("c-1", "p-1", pn, layout)
    }

    fn seeded_store(names: &[&str]) -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        for name in names {
            store.insert("acme-console-data-management", &asset_key("p-1", name), png(32, 32));
        }
        store
    }

    fn pipeline(store: MemoryObjectStore, work_dir: &TempDir) -> StickerPipeline<MemoryObjectStore> {
        let config = PipelineConfig::new(work_dir.path())
            .with_retry_attempts(1)
            .with_fetch_timeout(Duration::from_secs(5))
            .with_image_workers(2);
        StickerPipeline::new(store, config)
    }

    #[tokio::test]
    async fn test_publish_before_build_is_not_built() {
        let work_dir = TempDir::new().unwrap();
        let pipeline = pipeline(MemoryObjectStore::new(), &work_dir);

        let err = pipeline
            .publish(&Tenant::new("acme"), &package("PK1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotBuilt);
        assert_eq!(err.tag(), "NOT_BUILT");
        assert_eq!(pipeline.state("PK1"), PackageState::Failed(ErrorKind::NotBuilt));
    }

    #[tokio::test]
    async fn test_missing_asset_fails_before_tree_exists() {
        let work_dir = TempDir::new().unwrap();
        // "cat" is never uploaded
        let store = seeded_store(&FIXED_ASSETS);
        let pipeline = pipeline(store, &work_dir);

        let err = pipeline
            .build(&Tenant::new("acme"), &package("PK1"))
            .await
            .unwrap_err();

        assert_eq!(err.tag(), "MISSING_ASSET");
        assert!(!WorkingTree::new(work_dir.path(), "PK1").exists());
        assert_eq!(pipeline.state("PK1"), PackageState::Failed(ErrorKind::MissingAsset));
    }

    #[tokio::test]
    async fn test_build_then_state_built() {
        let work_dir = TempDir::new().unwrap();
        let mut names: Vec<&str> = FIXED_ASSETS.to_vec();
        names.push("cat");
        let pipeline = pipeline(seeded_store(&names), &work_dir);

        let report = pipeline
            .build(&Tenant::new("acme"), &package("PK1"))
            .await
            .unwrap();

        assert_eq!(report.sticker_count, 1);
        assert_eq!(report.artifacts.len(), 8);
        assert_eq!(pipeline.state("PK1"), PackageState::Built);
        assert!(WorkingTree::new(work_dir.path(), "PK1").is_built());
    }

    #[tokio::test]
    async fn test_lock_entries_released_after_use() {
        let work_dir = TempDir::new().unwrap();
        let mut names: Vec<&str> = FIXED_ASSETS.to_vec();
        names.push("cat");
        let pipeline = pipeline(seeded_store(&names), &work_dir);
        let tenant = Tenant::new("acme");

        pipeline.build(&tenant, &package("PK1")).await.unwrap();
        pipeline.build(&tenant, &package("PK2")).await.unwrap();
        pipeline.publish(&tenant, &package("PK1")).await.unwrap();
        assert!(pipeline.locks.is_empty());

        assert_eq!(pipeline.forget("PK1"), Some(PackageState::Published));
        assert_eq!(pipeline.state("PK1"), PackageState::Idle);
        assert_eq!(pipeline.state("PK2"), PackageState::Built);
    }

    #[tokio::test]
    async fn test_lock_held_while_waiting_is_kept() {
        let work_dir = TempDir::new().unwrap();
        let pipeline = pipeline(MemoryObjectStore::new(), &work_dir);

        let first = pipeline.lock_package("PK1").await.unwrap();
        let waiter = Arc::clone(pipeline.locks.get("PK1").unwrap().value());
        drop(first);
        // another caller still references the mutex
        assert_eq!(pipeline.locks.len(), 1);

        drop(waiter);
        let again = pipeline.lock_package("PK1").await.unwrap();
        drop(again);
        assert!(pipeline.locks.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_tenant_rejected() {
        let work_dir = TempDir::new().unwrap();
        let pipeline = pipeline(MemoryObjectStore::new(), &work_dir);

        let err = pipeline
            .build(&Tenant::new(""), &package("PK1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(pipeline.state("PK1"), PackageState::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_refuses_work() {
        let work_dir = TempDir::new().unwrap();
        let pipeline = pipeline(MemoryObjectStore::new(), &work_dir);
        pipeline.cancel();

        let err = pipeline
            .build(&Tenant::new("acme"), &package("PK1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
