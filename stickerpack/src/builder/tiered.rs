//! Multi-density builder for the tiered (android) platform.
//!
//! Runs in three phases:
//!
//! 1. **Package pass**: every asset except the preview is rendered into all
//!    five density directories. Banners go to `banner/`, icons and avatars
//!    to `other/`, stickers to the tier root. `meta/layout.json` is written
//!    into every tier before any image work.
//! 2. **Fold**: once all assets are joined, each tier directory becomes
//!    `<tier>/<pn>.zip` and its `meta/` and `other/` directories are removed.
//! 3. **Store-listing pass**: preview, icons and avatars are written loose at
//!    each tier root, outside the archive. At the baseline tier the preview
//!    is flattened onto white and stored as JPEG only.
//!
//! For every asset the baseline (640) tier is written first; the remaining
//! tiers then run concurrently and are joined with a counted barrier.

use std::path::{Path, PathBuf};

use tokio::task::JoinSet;

use super::{
    join_counted, write_json, AssetCategory, BuildArtifact, DensityTier, SourceAsset,
    SourceSet, WorkingTree, DENSITY_TIERS,
};
use crate::archive;
use crate::error::{ErrorKind, PipelineResult, Platform};
use crate::imaging;
use crate::layout::Layout;
use crate::limiter::ImageWorkers;

/// Sub-directory for banner renditions.
pub const BANNER_DIR: &str = "banner";

/// Sub-directory for icons in the package pass; removed after folding.
pub const OTHER_DIR: &str = "other";

/// Sub-directory holding grid metadata; removed after folding.
pub const META_DIR: &str = "meta";

/// Grid metadata file inside [`META_DIR`].
pub const LAYOUT_FILE: &str = "layout.json";

/// Which placement rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Archived content; icons go to `other/`.
    Package,
    /// Loose store-listing files; icons opt out of `other/`.
    StoreListing,
}

/// Output file for one asset at one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Output {
    Png(PathBuf),
    FlattenedJpeg(PathBuf),
}

fn output_for(tier_dir: &Path, tier: &DensityTier, asset: &SourceAsset, pass: Pass) -> Output {
    let png = format!("{}.png", asset.name);
    match asset.category {
        AssetCategory::Preview if tier.is_baseline() => {
            Output::FlattenedJpeg(tier_dir.join(format!("{}.jpg", asset.name)))
        }
        AssetCategory::Banner => Output::Png(tier_dir.join(BANNER_DIR).join(png)),
        AssetCategory::Icon if pass == Pass::Package => {
            Output::Png(tier_dir.join(OTHER_DIR).join(png))
        }
        _ => Output::Png(tier_dir.join(png)),
    }
}

/// Render one asset at one density. Blocking.
fn render_tier(asset: &SourceAsset, tier: &DensityTier, tier_dir: &Path, pass: Pass) -> PipelineResult<()> {
    let (width, height) = tier.dimensions(asset.image.width(), asset.image.height());
    let resized = imaging::resize(&asset.image, width, height);
    match output_for(tier_dir, tier, asset, pass) {
        Output::Png(path) => imaging::write_png(&resized, &path),
        Output::FlattenedJpeg(path) => {
            let flat = imaging::flatten_on_white(&resized);
            imaging::write_jpeg(&flat, &path, imaging::PREVIEW_JPEG_QUALITY)
        }
    }
}

/// Builder for the five density tiers.
#[derive(Debug, Clone)]
pub struct TieredBuilder {
    workers: ImageWorkers,
}

impl TieredBuilder {
    pub fn new(workers: ImageWorkers) -> Self {
        Self { workers }
    }

    /// Build every tier and return one artifact per tier, in tier order.
    pub async fn build(
        &self,
        tree: &WorkingTree,
        layout: &Layout,
        sources: &SourceSet,
    ) -> PipelineResult<Vec<BuildArtifact>> {
        let package = tree.package_number().to_string();
        tracing::info!(package = %package, assets = sources.len(), "Building density tiers");

        for tier in &DENSITY_TIERS {
            let path = tree.tier_dir(tier).join(META_DIR).join(LAYOUT_FILE);
            // recomputed per tier from the authoritative layout
            let normalized = layout.normalize();
            self.workers
                .run(format!("meta {}", tier.name), move || {
                    write_json(&path, &normalized, ErrorKind::ImageProcessing)
                })
                .await
                .map_err(|e| e.on(Platform::Android))?;
        }

        let package_assets: Vec<SourceAsset> = sources
            .assets()
            .iter()
            .filter(|a| a.category != AssetCategory::Preview)
            .cloned()
            .collect();
        self.render_pass(tree, package_assets, Pass::Package).await?;

        let artifacts = self.fold_tiers(tree).await?;

        let listing_assets: Vec<SourceAsset> = sources
            .assets()
            .iter()
            .filter(|a| matches!(a.category, AssetCategory::Preview | AssetCategory::Icon))
            .cloned()
            .collect();
        self.render_pass(tree, listing_assets, Pass::StoreListing).await?;

        tracing::info!(package = %package, tiers = artifacts.len(), "Density tiers built");
        Ok(artifacts)
    }

    /// Render `assets` into every tier, all assets concurrently.
    async fn render_pass(
        &self,
        tree: &WorkingTree,
        assets: Vec<SourceAsset>,
        pass: Pass,
    ) -> PipelineResult<()> {
        let tiers: Vec<(DensityTier, PathBuf)> =
            DENSITY_TIERS.iter().map(|t| (*t, tree.tier_dir(t))).collect();

        let expected = assets.len();
        let mut set = JoinSet::new();
        for asset in assets {
            let workers = self.workers.clone();
            let tiers = tiers.clone();
            set.spawn(async move { render_asset(workers, tiers, asset, pass).await });
        }
        join_counted(set, expected, Platform::Android, "density render").await?;
        Ok(())
    }

    /// Fold each tier directory into `<tier>/<pn>.zip`, tiers concurrently.
    async fn fold_tiers(&self, tree: &WorkingTree) -> PipelineResult<Vec<BuildArtifact>> {
        let mut set = JoinSet::new();
        for tier in DENSITY_TIERS {
            let tree = tree.clone();
            let workers = self.workers.clone();
            set.spawn(async move {
                workers
                    .run(format!("fold {}", tier.name), move || fold_tier(&tree, &tier))
                    .await
            });
        }

        let mut artifacts =
            join_counted(set, DENSITY_TIERS.len(), Platform::Android, "density fold").await?;
        artifacts.sort_by_key(|a: &BuildArtifact| {
            DENSITY_TIERS.iter().position(|t| t.name == a.tier)
        });
        Ok(artifacts)
    }
}

/// Render one asset at all densities: baseline first, then the rest.
async fn render_asset(
    workers: ImageWorkers,
    tiers: Vec<(DensityTier, PathBuf)>,
    asset: SourceAsset,
    pass: Pass,
) -> PipelineResult<()> {
    let (baseline, others): (Vec<_>, Vec<_>) = tiers.into_iter().partition(|(t, _)| t.is_baseline());

    for (tier, dir) in baseline {
        let job_asset = asset.clone();
        workers
            .run(format!("{}@{}", asset.name, tier.name), move || {
                render_tier(&job_asset, &tier, &dir, pass)
            })
            .await?;
    }

    let expected = others.len();
    let mut set = JoinSet::new();
    for (tier, dir) in others {
        let workers = workers.clone();
        let job_asset = asset.clone();
        let label = format!("{}@{}", asset.name, tier.name);
        set.spawn(async move {
            workers
                .run(label, move || render_tier(&job_asset, &tier, &dir, pass))
                .await
        });
    }
    join_counted(set, expected, Platform::Android, &asset.name).await?;

    tracing::debug!(asset = %asset.name, pass = %pass, "Rendered all densities");
    Ok(())
}

fn fold_tier(tree: &WorkingTree, tier: &DensityTier) -> PipelineResult<BuildArtifact> {
    let tier_dir = tree.tier_dir(tier);
    let partial = tree
        .tiered_root()
        .join(format!(".{}.{}.partial", tier.name, archive::ARCHIVE_EXTENSION));

    let folded = archive::fold_directory(&tier_dir, &partial, None)?;
    let placed = archive::relocate(&folded, &tree.tier_archive(tier))?;

    let leftovers = archive::remove_transient(&[tier_dir.join(META_DIR), tier_dir.join(OTHER_DIR)]);
    if !leftovers.is_empty() {
        tracing::warn!(
            tier = tier.name,
            count = leftovers.len(),
            "Transient directories left behind"
        );
    }

    tracing::info!(
        package = tree.package_number(),
        tier = tier.name,
        entries = placed.entries,
        size = placed.size,
        "Tier archived"
    );
    Ok(BuildArtifact::from_folded(Platform::Android, tier.name, placed))
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::Package => f.write_str("package"),
            Pass::StoreListing => f.write_str("store-listing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::archive_entries;
    use crate::layout::{BoxGroup, StickerPlacement};
    use bytes::Bytes;
    use image::{DynamicImage, RgbaImage};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn asset(name: &str, width: u32, height: u32) -> SourceAsset {
        SourceAsset {
            name: name.to_string(),
            category: AssetCategory::classify(name),
            image: Arc::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                width,
                height,
                image::Rgba([10, 20, 30, 200]),
            ))),
        }
    }

    fn sources(names: &[&str]) -> SourceSet {
        let png = imaging::encode_png(&asset("x", 64, 64).image).unwrap();
        let buffers: HashMap<String, Bytes> = names
            .iter()
            .map(|n| (n.to_string(), Bytes::from(png.clone())))
            .collect();
        SourceSet::decode(&buffers).unwrap()
    }

    fn layout() -> Layout {
        Layout::new(vec![BoxGroup::new(
            "g",
            vec![
                StickerPlacement::new("cat", 0, 0, 1, 1),
                StickerPlacement::new("dog", 1, 0, 1, 1),
            ],
        )])
        .unwrap()
    }

    #[test]
    fn test_output_rules() {
        let dir = Path::new("/w/PK/hdpi");
        let hdpi = DENSITY_TIERS[1];
        let baseline = DENSITY_TIERS[4];

        assert_eq!(
            output_for(dir, &hdpi, &asset("banner", 1, 1), Pass::Package),
            Output::Png(dir.join("banner/banner.png"))
        );
        assert_eq!(
            output_for(dir, &hdpi, &asset("avatar", 1, 1), Pass::Package),
            Output::Png(dir.join("other/avatar.png"))
        );
        assert_eq!(
            output_for(dir, &hdpi, &asset("avatar", 1, 1), Pass::StoreListing),
            Output::Png(dir.join("avatar.png"))
        );
        assert_eq!(
            output_for(dir, &hdpi, &asset("cat", 1, 1), Pass::Package),
            Output::Png(dir.join("cat.png"))
        );
        assert_eq!(
            output_for(dir, &hdpi, &asset("preview", 1, 1), Pass::StoreListing),
            Output::Png(dir.join("preview.png"))
        );
        assert_eq!(
            output_for(dir, &baseline, &asset("preview", 1, 1), Pass::StoreListing),
            Output::FlattenedJpeg(dir.join("preview.jpg"))
        );
    }

    #[test]
    fn test_render_tier_scales_to_density() {
        let dir = tempfile::TempDir::new().unwrap();
        let xhdpi = DENSITY_TIERS[2];
        render_tier(&asset("cat", 601, 599), &xhdpi, dir.path(), Pass::Package).unwrap();

        let written = image::open(dir.path().join("cat.png")).unwrap();
        assert_eq!((written.width(), written.height()), (300, 300));
    }

    #[tokio::test]
    async fn test_build_produces_one_archive_per_tier() {
        let dir = tempfile::TempDir::new().unwrap();
        let tree = WorkingTree::new(dir.path(), "PK1");
        let builder = TieredBuilder::new(ImageWorkers::new(4, CancellationToken::new()));
        let set = sources(&["icon", "unavailable_icon", "avatar", "preview", "banner", "cat", "dog"]);

        let artifacts = builder.build(&tree, &layout(), &set).await.unwrap();
        assert_eq!(artifacts.len(), 5);
        let tiers: Vec<&str> = artifacts.iter().map(|a| a.tier.as_str()).collect();
        assert_eq!(tiers, vec!["mdpi", "hdpi", "xhdpi", "xxhdpi", "xxxhdpi"]);

        for tier in &DENSITY_TIERS {
            let tier_dir = tree.tier_dir(tier);
            assert!(tree.tier_archive(tier).is_file());
            assert!(!tier_dir.join(META_DIR).exists());
            assert!(!tier_dir.join(OTHER_DIR).exists());
            assert!(tier_dir.join("icon.png").is_file());
            assert!(tier_dir.join("avatar.png").is_file());

            let zips = std::fs::read_dir(&tier_dir)
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|x| x == "zip"))
                .count();
            assert_eq!(zips, 1);

            let mut entries = archive_entries(&tree.tier_archive(tier)).unwrap();
            entries.sort();
            assert_eq!(
                entries,
                vec![
                    "banner/banner.png",
                    "cat.png",
                    "dog.png",
                    "meta/layout.json",
                    "other/avatar.png",
                    "other/icon.png",
                    "other/unavailable_icon.png",
                ]
            );
        }

        let baseline = tree.tier_dir(&DENSITY_TIERS[4]);
        assert!(baseline.join("preview.jpg").is_file());
        assert!(!baseline.join("preview.png").exists());
        assert!(tree.tier_dir(&DENSITY_TIERS[0]).join("preview.png").is_file());
    }

    #[tokio::test]
    async fn test_cancelled_build_fails_without_archives() {
        let dir = tempfile::TempDir::new().unwrap();
        let tree = WorkingTree::new(dir.path(), "PK1");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let builder = TieredBuilder::new(ImageWorkers::new(2, cancel));

        let err = builder
            .build(&tree, &layout(), &sources(&["cat", "dog"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!tree.tier_archive(&DENSITY_TIERS[0]).exists());
    }

    #[test]
    fn test_pass_display() {
        assert_eq!(Pass::StoreListing.to_string(), "store-listing");
        assert_eq!(Pass::Package.to_string(), "package");
    }
}
