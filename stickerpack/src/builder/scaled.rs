//! Per-scale builder for the scaled (ios) platform.
//!
//! Each scale directory `<xN>/` receives the sticker manifest and a
//! `<pn>/` folder of renditions, which is then folded into `<xN>/<pn>.zip`
//! (entries under `<pn>/`) and removed.
//!
//! Renditions by category:
//!
//! | Category | Outputs | Transform |
//! |----------|---------|-----------|
//! | Sticker, icon, avatar | one per scale | resize by scale factor |
//! | Preview | six named device classes | centred crop-to-fill |
//! | Banner | five named device classes | resize, posterize, max compression |

use std::path::PathBuf;

use tokio::task::JoinSet;

use super::manifest::{StickerManifest, MANIFEST_FILES};
use super::{
    join_counted, scale_tier, write_json, AssetCategory, BuildArtifact, ScaleTier,
    SourceAsset, SourceSet, WorkingTree, SCALE_TIERS,
};
use crate::archive;
use crate::error::{ErrorKind, PipelineError, PipelineResult, Platform};
use crate::imaging;
use crate::layout::Layout;
use crate::limiter::ImageWorkers;

/// Colour levels per channel kept in banner renditions.
pub const BANNER_POSTERIZE_LEVELS: u8 = 32;

/// Preview renditions: (file stem, scale tag, width multiplier, height multiplier).
pub const PREVIEW_RENDITIONS: [(&str, &str, f64, f64); 6] = [
    ("preview_iphone", "x1", 0.3125, 0.25),
    ("preview_ipad", "x1", 0.4, 0.3),
    ("preview_iphone@2x", "x2", 0.625, 0.5),
    ("preview_ipad@2x", "x2", 0.8, 0.6),
    ("preview_iphone@3x", "x3", 0.9375, 0.75),
    ("preview_ipad@3x", "x3", 1.2, 0.9),
];

/// Banner renditions: (file stem, scale tag, multiplier).
pub const BANNER_RENDITIONS: [(&str, &str, f64); 5] = [
    ("banner_ipad", "x1", 0.5),
    ("banner_iphone@2x", "x2", 0.75),
    ("banner_ipad@2x", "x2", 1.0),
    ("banner_ipad_pro@2x", "x2", 1.25),
    ("banner_iphone@3x", "x3", 1.125),
];

/// Client file stem for an asset name.
///
/// The consuming client looks these names up verbatim.
pub fn client_stem(name: &str) -> &str {
    match name {
        "avatar" => "bucket_icon",
        "icon" => "avatar_small",
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    Resize,
    CropToFill,
    Posterize,
}

/// One output file to render.
#[derive(Debug, Clone)]
struct Rendition {
    asset: SourceAsset,
    path: PathBuf,
    width: u32,
    height: u32,
    transform: Transform,
}

impl Rendition {
    fn render(&self) -> PipelineResult<()> {
        let image = &self.asset.image;
        match self.transform {
            Transform::Resize => {
                imaging::write_png(&imaging::resize(image, self.width, self.height), &self.path)
            }
            Transform::CropToFill => imaging::write_png(
                &imaging::crop_to_fill(image, self.width, self.height),
                &self.path,
            ),
            Transform::Posterize => {
                let resized = imaging::resize(image, self.width, self.height);
                let reduced = imaging::posterize(&resized, BANNER_POSTERIZE_LEVELS);
                imaging::write_png_compact(&reduced, &self.path)
            }
        }
    }
}

fn package_dir(tree: &WorkingTree, scale: &ScaleTier) -> PathBuf {
    tree.scale_dir(scale).join(tree.package_number())
}

fn named_path(tree: &WorkingTree, scale_tag: &str, stem: &str) -> PipelineResult<PathBuf> {
    let scale = scale_tier(scale_tag)
        .ok_or_else(|| PipelineError::image(format!("unknown scale tier '{}'", scale_tag)))?;
    Ok(package_dir(tree, &scale).join(format!("{}.png", stem)))
}

/// Every output file an asset yields on the scaled platform.
fn plan(tree: &WorkingTree, asset: &SourceAsset) -> PipelineResult<Vec<Rendition>> {
    let (width, height) = (asset.image.width(), asset.image.height());
    let rendition = |path: PathBuf, (w, h): (u32, u32), transform: Transform| Rendition {
        asset: asset.clone(),
        path,
        width: w,
        height: h,
        transform,
    };

    match asset.category {
        AssetCategory::Preview => PREVIEW_RENDITIONS
            .iter()
            .map(|&(stem, scale, mw, mh)| -> PipelineResult<Rendition> {
                let size = (
                    imaging::round_dimension(width as f64 * mw),
                    imaging::round_dimension(height as f64 * mh),
                );
                Ok(rendition(named_path(tree, scale, stem)?, size, Transform::CropToFill))
            })
            .collect(),
        AssetCategory::Banner => BANNER_RENDITIONS
            .iter()
            .map(|&(stem, scale, m)| -> PipelineResult<Rendition> {
                let size = imaging::scaled_dimensions(width, height, m);
                Ok(rendition(named_path(tree, scale, stem)?, size, Transform::Posterize))
            })
            .collect(),
        AssetCategory::Icon | AssetCategory::Sticker => Ok(SCALE_TIERS
            .iter()
            .map(|scale| {
                let file = format!("{}{}.png", client_stem(&asset.name), scale.suffix());
                let path = package_dir(tree, scale).join(file);
                rendition(path, scale.dimensions(width, height), Transform::Resize)
            })
            .collect()),
    }
}

/// Builder for the three scale directories.
#[derive(Debug, Clone)]
pub struct ScaledBuilder {
    workers: ImageWorkers,
}

impl ScaledBuilder {
    pub fn new(workers: ImageWorkers) -> Self {
        Self { workers }
    }

    /// Build every scale directory and return one artifact per scale.
    pub async fn build(
        &self,
        tree: &WorkingTree,
        layout: &Layout,
        sources: &SourceSet,
    ) -> PipelineResult<Vec<BuildArtifact>> {
        let on_ios = |e: PipelineError| e.on(Platform::Ios);
        tracing::info!(package = tree.package_number(), assets = sources.len(), "Building scale tiers");

        let manifest = StickerManifest::from_layout(tree.package_number(), &layout.normalize());
        for scale in &SCALE_TIERS {
            let dir = package_dir(tree, scale);
            let scale_dir = tree.scale_dir(scale);
            let manifest = manifest.clone();
            self.workers
                .run(format!("manifest {}", scale.name), move || {
                    std::fs::create_dir_all(&dir)
                        .map_err(|e| PipelineError::io(ErrorKind::ImageProcessing, "create", &dir, e))?;
                    for file in MANIFEST_FILES {
                        write_json(&scale_dir.join(file), &manifest, ErrorKind::ImageProcessing)?;
                    }
                    Ok(())
                })
                .await
                .map_err(on_ios)?;
        }

        let mut renditions = Vec::new();
        for asset in sources.assets() {
            renditions.extend(plan(tree, asset).map_err(on_ios)?);
        }

        let expected = renditions.len();
        let mut set = JoinSet::new();
        for rendition in renditions {
            let workers = self.workers.clone();
            let label = rendition.path.display().to_string();
            set.spawn(async move { workers.run(label, move || rendition.render()).await });
        }
        join_counted(set, expected, Platform::Ios, "scale render").await?;

        let mut set = JoinSet::new();
        for scale in SCALE_TIERS {
            let tree = tree.clone();
            let workers = self.workers.clone();
            set.spawn(async move {
                workers
                    .run(format!("fold {}", scale.name), move || fold_scale(&tree, &scale))
                    .await
            });
        }
        let mut artifacts = join_counted(set, SCALE_TIERS.len(), Platform::Ios, "scale fold").await?;
        artifacts.sort_by(|a, b| a.tier.cmp(&b.tier));

        tracing::info!(package = tree.package_number(), scales = artifacts.len(), "Scale tiers built");
        Ok(artifacts)
    }
}

fn fold_scale(tree: &WorkingTree, scale: &ScaleTier) -> PipelineResult<BuildArtifact> {
    let source = package_dir(tree, scale);
    let folded = archive::fold_directory(
        &source,
        &tree.scale_archive(scale),
        Some(tree.package_number()),
    )?;
    archive::remove_transient(&[source]);

    tracing::info!(
        package = tree.package_number(),
        scale = scale.name,
        entries = folded.entries,
        size = folded.size,
        "Scale archived"
    );
    Ok(BuildArtifact::from_folded(Platform::Ios, scale.name, folded))
}
