//! Integration tests for the build and publish pipeline.
//!
//! These tests drive `StickerPipeline` end to end against an in-memory
//! object store seeded with generated PNG artwork:
//! - build produces both platform trees with one archive per directory
//! - publish uploads deterministic keys and removes the working trees
//! - precondition and upload failures leave the documented state behind
//!
//! Run with: `cargo test --test pipeline_integration`

use std::fs;
use std::path::Path;
use std::time::Duration;

use image::{DynamicImage, Rgba, RgbaImage};
use tempfile::TempDir;

use stickerpack::archive::archive_entries;
use stickerpack::builder::{DENSITY_TIERS, SCALE_TIERS};
use stickerpack::config::MirrorConfig;
use stickerpack::fetch::asset_key;
use stickerpack::imaging::encode_png;
use stickerpack::layout::{BoxGroup, Layout, StickerPlacement, FIXED_ASSETS};
use stickerpack::storage::StorageError;
use stickerpack::{
    ErrorKind, MemoryObjectStore, PackageState, PipelineConfig, StickerPackage, StickerPipeline,
    Tenant, WorkingTree,
};

// ============================================================================
// Helper Functions
// ============================================================================

const SOURCE_BUCKET: &str = "acme-console-data-management";
const PACKAGE_BUCKET: &str = "acme-sticker-packages";
const PACKAGE_ID: &str = "p-100";
const PN: &str = "PK0100";

fn artwork(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        let alpha = if (x + y) % 7 == 0 { 0 } else { 255 };
        Rgba([shade, (x * 3) as u8, (y * 5) as u8, alpha])
    });
    encode_png(&DynamicImage::ImageRgba8(image)).unwrap()
}

/// One box group holding two stickers.
fn two_sticker_package() -> StickerPackage {
    let layout = Layout::new(vec![BoxGroup::new(
        "smileys",
        vec![
            StickerPlacement::new("grin", 0, 4, 1, 1),
            StickerPlacement::new("wink", 1, 4, 2, 1),
        ],
    )])
    .unwrap();
    StickerPackage::new("c-9", PACKAGE_ID, PN, layout)
}

/// Seed the source bucket with every fixed asset plus the given stickers.
fn seed(store: &MemoryObjectStore, stickers: &[&str]) {
    for (i, name) in FIXED_ASSETS.iter().chain(stickers).enumerate() {
        let (w, h) = match *name {
            "banner" => (96, 40),
            "preview" => (80, 64),
            _ => (48, 48),
        };
        store.insert(SOURCE_BUCKET, &asset_key(PACKAGE_ID, name), artwork(w, h, 20 * i as u8));
    }
}

fn config(work_dir: &Path) -> PipelineConfig {
    PipelineConfig::new(work_dir)
        .with_retry_attempts(2)
        .with_fetch_timeout(Duration::from_secs(10))
        .with_upload_timeout(Duration::from_secs(10))
        .with_image_workers(4)
}

fn zip_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "zip"))
        .count()
}

// ============================================================================
// Integration Tests
// ============================================================================

#[tokio::test]
async fn test_build_then_publish_end_to_end() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store.clone(), config(work_dir.path()));
    let tenant = Tenant::new("acme");
    let package = two_sticker_package();

    let report = pipeline.build(&tenant, &package).await.unwrap();
    assert_eq!(report.sticker_count, 2);
    assert_eq!(report.artifacts.len(), DENSITY_TIERS.len() + SCALE_TIERS.len());
    assert_eq!(pipeline.state(PN), PackageState::Built);

    let tree = WorkingTree::new(work_dir.path(), PN);
    for tier in &DENSITY_TIERS {
        let dir = tree.tier_dir(tier);
        assert_eq!(zip_count(&dir), 1, "tier {}", tier.name);
        assert!(tree.tier_archive(tier).is_file());
        assert!(!dir.join("meta").exists());
        assert!(!dir.join("other").exists());
    }
    for scale in &SCALE_TIERS {
        let dir = tree.scale_dir(scale);
        assert_eq!(zip_count(&dir), 1, "scale {}", scale.name);
        assert!(dir.join("settings.json").is_file());
        assert!(dir.join("settings_ipad.json").is_file());
        assert!(!dir.join(PN).exists());
    }

    let outcome = pipeline.publish(&tenant, &package).await.unwrap();
    assert_eq!(outcome.android.bucket, PACKAGE_BUCKET);
    assert_eq!(outcome.android.prefix, format!("android/{}", PN));
    assert_eq!(outcome.ios.prefix, format!("ios/{}", PN));
    assert!(outcome.mirror.is_none());
    assert_eq!(pipeline.state(PN), PackageState::Published);

    let android_keys = store.keys(PACKAGE_BUCKET, &format!("android/{}/", PN));
    let ios_keys = store.keys(PACKAGE_BUCKET, &format!("ios/{}/", PN));
    for tier in &DENSITY_TIERS {
        let key = format!("android/{}/{}/{}.zip", PN, tier.name, PN);
        assert!(android_keys.contains(&key), "missing {}", key);
    }
    for scale in &SCALE_TIERS {
        let key = format!("ios/{}/{}/settings.json", PN, scale.name);
        assert!(ios_keys.contains(&key), "missing {}", key);
    }
    assert!(android_keys.contains(&format!("android/{}/xxxhdpi/preview.jpg", PN)));

    assert!(!tree.tiered_root().exists());
    assert!(!tree.scaled_root().exists());
}

#[tokio::test]
async fn test_scaled_archive_names_follow_client_table() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store, config(work_dir.path()));

    pipeline.build(&Tenant::new("acme"), &two_sticker_package()).await.unwrap();

    let tree = WorkingTree::new(work_dir.path(), PN);
    let x2 = archive_entries(&tree.scale_dir(&SCALE_TIERS[1]).join(format!("{}.zip", PN))).unwrap();
    for name in ["grin@2x.png", "bucket_icon@2x.png", "avatar_small@2x.png", "preview_ipad@2x.png"] {
        assert!(
            x2.contains(&format!("{}/{}", PN, name)),
            "x2 archive lacks {}: {:?}",
            name,
            x2
        );
    }

    let x1 = archive_entries(&tree.scale_dir(&SCALE_TIERS[0]).join(format!("{}.zip", PN))).unwrap();
    assert!(x1.contains(&format!("{}/grin.png", PN)));
    assert!(x1.contains(&format!("{}/banner_ipad.png", PN)));
}

#[tokio::test]
async fn test_missing_sticker_fails_without_working_tree() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin"]);
    let pipeline = StickerPipeline::new(store, config(work_dir.path()));

    let err = pipeline
        .build(&Tenant::new("acme"), &two_sticker_package())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingAsset);
    assert_eq!(err.tag(), "MISSING_ASSET");
    assert!(!WorkingTree::new(work_dir.path(), PN).exists());
    assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_rebuild_has_identical_archive_membership() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store, config(work_dir.path()));
    let tenant = Tenant::new("acme");
    let package = two_sticker_package();

    let first = pipeline.build(&tenant, &package).await.unwrap();
    let first_entries: Vec<Vec<String>> = first
        .artifacts
        .iter()
        .map(|a| archive_entries(&a.path).unwrap())
        .collect();

    let second = pipeline.build(&tenant, &package).await.unwrap();
    let second_entries: Vec<Vec<String>> = second
        .artifacts
        .iter()
        .map(|a| archive_entries(&a.path).unwrap())
        .collect();

    assert_eq!(first_entries, second_entries);
    for artifact in &second.artifacts {
        assert!(!archive_entries(&artifact.path).unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_republish_writes_same_keys() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store.clone(), config(work_dir.path()));
    let tenant = Tenant::new("acme");
    let package = two_sticker_package();

    pipeline.build(&tenant, &package).await.unwrap();
    pipeline.publish(&tenant, &package).await.unwrap();
    let first_keys = store.keys(PACKAGE_BUCKET, "");
    let objects_after_first = store.len();

    pipeline.build(&tenant, &package).await.unwrap();
    pipeline.publish(&tenant, &package).await.unwrap();

    assert_eq!(store.keys(PACKAGE_BUCKET, ""), first_keys);
    assert_eq!(store.len(), objects_after_first);
}

#[tokio::test]
async fn test_upload_failure_aborts_and_keeps_tree() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store.clone(), config(work_dir.path()));
    let tenant = Tenant::new("acme");
    let package = two_sticker_package();

    pipeline.build(&tenant, &package).await.unwrap();
    store.fail_key(
        &format!("android/{}/hdpi/{}.zip", PN, PN),
        StorageError::Rejected {
            status: 403,
            message: "denied".to_string(),
        },
        1,
    );

    let err = pipeline.publish(&tenant, &package).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upload);
    assert_eq!(err.tag(), "STICKER_UPLOAD_ERROR");
    assert_eq!(pipeline.state(PN), PackageState::Failed(ErrorKind::Upload));

    // trees survive a failed publish, so the same build can be published again
    let tree = WorkingTree::new(work_dir.path(), PN);
    assert!(tree.is_built());
    pipeline.publish(&tenant, &package).await.unwrap();
    assert!(!tree.exists());
}

#[tokio::test]
async fn test_transient_upload_failure_is_retried() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store.clone(), config(work_dir.path()));
    let tenant = Tenant::new("acme");
    let package = two_sticker_package();

    pipeline.build(&tenant, &package).await.unwrap();
    let key = format!("ios/{}/x3/{}.zip", PN, PN);
    store.fail_key(&key, StorageError::Transport("connection reset".to_string()), 1);

    pipeline.publish(&tenant, &package).await.unwrap();
    assert!(store.object(PACKAGE_BUCKET, &key).is_some());
}

#[tokio::test]
async fn test_publish_without_build_is_not_built() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    let pipeline = StickerPipeline::new(store.clone(), config(work_dir.path()));

    let err = pipeline
        .publish(&Tenant::new("acme"), &two_sticker_package())
        .await
        .unwrap_err();

    assert_eq!(err.tag(), "NOT_BUILT");
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn test_mirror_and_bucket_override() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let mirror_store = MemoryObjectStore::new();
    let config = config(work_dir.path())
        .with_bucket_override("acme", "legacy-stickers")
        .with_mirror(MirrorConfig::new("brandx", "whitelabel-packages"));
    let pipeline =
        StickerPipeline::new(store.clone(), config).with_mirror_store(mirror_store.clone());
    let tenant = Tenant::new("acme");
    let package = two_sticker_package();

    pipeline.build(&tenant, &package).await.unwrap();
    let outcome = pipeline.publish(&tenant, &package).await.unwrap();

    assert_eq!(outcome.android.bucket, "legacy-stickers");
    let mirror = outcome.mirror.expect("mirror locations");
    assert_eq!(mirror.android.bucket, "whitelabel-packages");
    assert_eq!(mirror.ios.prefix, format!("brandx/ios/{}", PN));

    let primary_keys: Vec<String> = store.keys("legacy-stickers", "");
    let mirror_keys: Vec<String> = mirror_store.keys("whitelabel-packages", "brandx/");
    assert!(!primary_keys.is_empty());
    assert_eq!(primary_keys.len(), mirror_keys.len());
    for key in &primary_keys {
        assert!(mirror_keys.contains(&format!("brandx/{}", key)), "mirror lacks {}", key);
    }
}

#[tokio::test]
async fn test_concurrent_builds_of_different_packages() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store, config(work_dir.path()));
    let tenant = Tenant::new("acme");

    let first = two_sticker_package();
    let mut second = two_sticker_package();
    second.package_number = "PK0200".to_string();

    let (a, b) = tokio::join!(pipeline.build(&tenant, &first), pipeline.build(&tenant, &second));
    a.unwrap();
    b.unwrap();

    assert!(WorkingTree::new(work_dir.path(), PN).is_built());
    assert!(WorkingTree::new(work_dir.path(), "PK0200").is_built());
}

#[tokio::test]
async fn test_build_and_publish_of_same_package_run_in_turn() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store.clone(), config(work_dir.path()));
    let tenant = Tenant::new("acme");
    let package = two_sticker_package();

    // build is polled first and holds the package until its trees are done
    let (built, published) = tokio::join!(
        pipeline.build(&tenant, &package),
        pipeline.publish(&tenant, &package)
    );
    built.unwrap();
    published.unwrap();

    assert_eq!(pipeline.state(PN), PackageState::Published);
    assert!(!WorkingTree::new(work_dir.path(), PN).exists());
    let key = format!("android/{}/{}/{}.zip", PN, DENSITY_TIERS[0].name, PN);
    assert!(store.object(PACKAGE_BUCKET, &key).is_some());
}

#[tokio::test]
async fn test_concurrent_builds_of_same_package_leave_one_tree() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store, config(work_dir.path()));
    let tenant = Tenant::new("acme");
    let package = two_sticker_package();

    let (a, b) = tokio::join!(pipeline.build(&tenant, &package), pipeline.build(&tenant, &package));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(pipeline.state(PN), PackageState::Built);
    assert!(WorkingTree::new(work_dir.path(), PN).is_built());
    assert_eq!(a.artifacts.len(), b.artifacts.len());
    for (first, second) in a.artifacts.iter().zip(&b.artifacts) {
        assert_eq!(first.path, second.path);
        assert_eq!(
            archive_entries(&first.path).unwrap(),
            archive_entries(&second.path).unwrap()
        );
    }
}

#[tokio::test]
async fn test_image_failure_after_trees_exist_removes_both() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    // fits as "<name>.png" but not as "<name>@2x.png"
    let long_name = "s".repeat(250);
    seed(&store, &["grin", long_name.as_str()]);
    let layout = Layout::new(vec![BoxGroup::new(
        "smileys",
        vec![
            StickerPlacement::new("grin", 0, 4, 1, 1),
            StickerPlacement::new(long_name.as_str(), 1, 4, 1, 1),
        ],
    )])
    .unwrap();
    let package = StickerPackage::new("c-9", PACKAGE_ID, PN, layout);
    let pipeline = StickerPipeline::new(store, config(work_dir.path()));

    let err = pipeline.build(&Tenant::new("acme"), &package).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ImageProcessing);
    assert_eq!(err.tag(), "STICKER_FILE_PROCESS_ERROR");
    assert_eq!(pipeline.state(PN), PackageState::Failed(ErrorKind::ImageProcessing));
    assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_empty_source_object_is_invalid_files() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin"]);
    store.insert(SOURCE_BUCKET, &asset_key(PACKAGE_ID, "wink"), Vec::<u8>::new());
    let pipeline = StickerPipeline::new(store, config(work_dir.path()));

    let err = pipeline
        .build(&Tenant::new("acme"), &two_sticker_package())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidFiles);
    assert_eq!(err.tag(), "INVALID_FILES");
    assert!(err.to_string().contains("wink"));
    assert_eq!(pipeline.state(PN), PackageState::Failed(ErrorKind::InvalidFiles));
    assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_package_number_cannot_shadow_scaled_root() {
    let work_dir = TempDir::new().unwrap();
    let store = MemoryObjectStore::new();
    seed(&store, &["grin", "wink"]);
    let pipeline = StickerPipeline::new(store, config(work_dir.path()));
    let tenant = Tenant::new("acme");

    pipeline.build(&tenant, &two_sticker_package()).await.unwrap();

    let mut shadow = two_sticker_package();
    shadow.package_number = format!("{}_IOS", PN);
    let err = pipeline.build(&tenant, &shadow).await.unwrap_err();

    assert_eq!(err.tag(), "INVALID_LAYOUT");
    assert!(WorkingTree::new(work_dir.path(), PN).is_built());
    pipeline.publish(&tenant, &two_sticker_package()).await.unwrap();
}
