//! Platform builders.
//!
//! Both builders consume the same decoded [`SourceSet`] and write into the
//! package's [`WorkingTree`]:
//!
//! ```text
//! <work_dir>/<pn>/<tier>/<pn>.zip            tiered (android) platform
//! <work_dir>/<pn>_IOS/<scale>/<pn>.zip       scaled (ios) platform
//! <work_dir>/<pn>_IOS/<scale>/settings.json
//! ```
//!
//! Every blocking step that writes into the tree (renders, metadata,
//! manifests, folds) runs on an [`ImageWorkers`](crate::limiter::ImageWorkers)
//! limiter, so a failed build can wait for all of them before removing the
//! tree. Fan-outs are joined with [`join_counted`] before a directory is
//! archived.

pub mod manifest;
pub mod scaled;
pub mod tiered;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::archive::{self, FoldedArchive};
use crate::error::{ErrorKind, PipelineError, PipelineResult, Platform};
use crate::imaging;

pub use scaled::ScaledBuilder;
pub use tiered::TieredBuilder;

// =============================================================================
// Tiers
// =============================================================================

/// A density bucket of the tiered platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DensityTier {
    pub name: &'static str,
    /// Target size against the 640 baseline.
    pub size: u32,
}

impl DensityTier {
    pub fn is_baseline(&self) -> bool {
        self.size == imaging::DENSITY_BASELINE
    }

    pub fn dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        imaging::density_dimensions(width, height, self.size)
    }
}

pub const DENSITY_TIERS: [DensityTier; 5] = [
    DensityTier { name: "mdpi", size: 160 },
    DensityTier { name: "hdpi", size: 240 },
    DensityTier { name: "xhdpi", size: 320 },
    DensityTier { name: "xxhdpi", size: 480 },
    DensityTier { name: "xxxhdpi", size: 640 },
];

/// A scale directory of the scaled platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleTier {
    /// Directory tag, `x1`, `x2` or `x3`.
    pub name: &'static str,
    /// Direct multiplier on the source dimensions.
    pub factor: f64,
}

impl ScaleTier {
    /// File-name suffix: the tag reversed (`x2` -> `@2x`), empty at baseline.
    pub fn suffix(&self) -> String {
        if self.name == SCALE_TIERS[0].name {
            return String::new();
        }
        let reversed: String = self.name.chars().rev().collect();
        format!("@{}", reversed)
    }

    pub fn dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        imaging::scaled_dimensions(width, height, self.factor)
    }
}

pub const SCALE_TIERS: [ScaleTier; 3] = [
    ScaleTier { name: "x1", factor: 0.25 },
    ScaleTier { name: "x2", factor: 0.5 },
    ScaleTier { name: "x3", factor: 0.75 },
];

/// Look up a scale tier by tag.
pub fn scale_tier(name: &str) -> Option<ScaleTier> {
    SCALE_TIERS.iter().copied().find(|s| s.name == name)
}

// =============================================================================
// Source assets
// =============================================================================

/// How an asset is placed and transformed, decided by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetCategory {
    Banner,
    Preview,
    /// Icons and avatars.
    Icon,
    Sticker,
}

impl AssetCategory {
    /// Classify by name substring: banner, then preview, then icon/avatar.
    pub fn classify(name: &str) -> Self {
        if name.contains("banner") {
            AssetCategory::Banner
        } else if name.contains("preview") {
            AssetCategory::Preview
        } else if name.contains("icon") || name.contains("avatar") {
            AssetCategory::Icon
        } else {
            AssetCategory::Sticker
        }
    }
}

/// A decoded source image.
#[derive(Debug, Clone)]
pub struct SourceAsset {
    pub name: String,
    pub category: AssetCategory,
    pub image: Arc<DynamicImage>,
}

/// Every decoded asset of one package, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    assets: Vec<SourceAsset>,
}

impl SourceSet {
    /// Decode every fetched buffer. Nothing is written to disk.
    pub fn decode(buffers: &HashMap<String, Bytes>) -> PipelineResult<Self> {
        let mut assets = buffers
            .iter()
            .map(|(name, data)| {
                let image = imaging::decode(name, data)?;
                Ok(SourceAsset {
                    name: name.clone(),
                    category: AssetCategory::classify(name),
                    image: Arc::new(image),
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        assets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { assets })
    }

    pub fn assets(&self) -> &[SourceAsset] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SourceAsset> {
        self.assets.iter().find(|a| a.name == name)
    }

    pub fn of_category(&self, category: AssetCategory) -> impl Iterator<Item = &SourceAsset> {
        self.assets.iter().filter(move |a| a.category == category)
    }
}

// =============================================================================
// Working tree
// =============================================================================

/// Suffix that turns a package number into its scaled root folder name.
pub const SCALED_ROOT_SUFFIX: &str = "_IOS";

/// Package-scoped staging directories between build and publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingTree {
    work_dir: PathBuf,
    package_number: String,
}

impl WorkingTree {
    pub fn new(work_dir: impl Into<PathBuf>, package_number: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            package_number: package_number.into(),
        }
    }

    pub fn package_number(&self) -> &str {
        &self.package_number
    }

    /// `<work_dir>/<pn>`
    pub fn tiered_root(&self) -> PathBuf {
        self.work_dir.join(&self.package_number)
    }

    /// `<work_dir>/<pn>_IOS`
    pub fn scaled_root(&self) -> PathBuf {
        self.work_dir
            .join(format!("{}{}", self.package_number, SCALED_ROOT_SUFFIX))
    }

    pub fn root(&self, platform: Platform) -> PathBuf {
        match platform {
            Platform::Android => self.tiered_root(),
            Platform::Ios => self.scaled_root(),
        }
    }

    pub fn tier_dir(&self, tier: &DensityTier) -> PathBuf {
        self.tiered_root().join(tier.name)
    }

    pub fn scale_dir(&self, scale: &ScaleTier) -> PathBuf {
        self.scaled_root().join(scale.name)
    }

    /// File name of every tier archive: `<pn>.zip`.
    pub fn archive_name(&self) -> String {
        format!("{}.{}", self.package_number, archive::ARCHIVE_EXTENSION)
    }

    pub fn tier_archive(&self, tier: &DensityTier) -> PathBuf {
        self.tier_dir(tier).join(self.archive_name())
    }

    pub fn scale_archive(&self, scale: &ScaleTier) -> PathBuf {
        self.scale_dir(scale).join(self.archive_name())
    }

    /// Whether both platform trees hold every archive publish needs.
    pub fn is_built(&self) -> bool {
        self.missing_archives().is_empty()
    }

    /// Archives that publish expects but cannot find.
    pub fn missing_archives(&self) -> Vec<PathBuf> {
        DENSITY_TIERS
            .iter()
            .map(|t| self.tier_archive(t))
            .chain(SCALE_TIERS.iter().map(|s| self.scale_archive(s)))
            .filter(|p| !p.is_file())
            .collect()
    }

    /// Remove both platform trees so a build starts from nothing.
    pub fn clear(&self) -> PipelineResult<()> {
        for root in [self.tiered_root(), self.scaled_root()] {
            archive::remove_dir_if_present(&root)
                .map_err(|e| PipelineError::io(ErrorKind::Cleanup, "remove", &root, e))?;
        }
        Ok(())
    }

    /// Remove both platform trees, logging failures.
    pub fn remove_best_effort(&self) -> Vec<PathBuf> {
        archive::remove_transient(&[self.tiered_root(), self.scaled_root()])
    }

    pub fn exists(&self) -> bool {
        self.tiered_root().exists() || self.scaled_root().exists()
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// One archive produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifact {
    pub platform: Platform,
    /// Density or scale tag.
    pub tier: String,
    pub path: PathBuf,
    pub entries: usize,
    pub size: u64,
    pub sha256: String,
}

impl BuildArtifact {
    pub(crate) fn from_folded(platform: Platform, tier: &str, folded: FoldedArchive) -> Self {
        Self {
            platform,
            tier: tier.to_string(),
            path: folded.path,
            entries: folded.entries,
            size: folded.size,
            sha256: folded.sha256,
        }
    }
}

// =============================================================================
// Join helpers
// =============================================================================

/// Wait for exactly `expected` tasks of `set`.
///
/// The first failure aborts the remaining tasks and is returned. Fewer
/// completions than expected is itself an error.
pub(crate) async fn join_counted<T: 'static>(
    mut set: JoinSet<PipelineResult<T>>,
    expected: usize,
    platform: Platform,
    what: &str,
) -> PipelineResult<Vec<T>> {
    let mut done = Vec::with_capacity(expected);
    while let Some(joined) = set.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(PipelineError::cancelled(format!("{} task", what))),
            Err(e) => Err(PipelineError::image(format!("{} task panicked: {}", what, e))),
        };
        match result {
            Ok(value) => done.push(value),
            Err(e) => {
                set.abort_all();
                return Err(e.on(platform));
            }
        }
    }

    if done.len() != expected {
        return Err(PipelineError::image(format!(
            "{}: {} of {} jobs completed",
            what,
            done.len(),
            expected
        ))
        .on(platform));
    }
    Ok(done)
}

/// Write a pretty JSON document, creating parent directories.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T, kind: ErrorKind) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(kind, "create", parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PipelineError::new(kind, format!("failed to serialize {}", path.display())).with_source(e))?;
    std::fs::write(path, json).map_err(|e| PipelineError::io(kind, "write", path, e))
}
