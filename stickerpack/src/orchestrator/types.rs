//! Orchestrator state and result types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::builder::BuildArtifact;
use crate::error::ErrorKind;
use crate::publisher::PlatformLocations;
use crate::storage::StorageLocation;

/// Lifecycle of one package inside a pipeline.
///
/// ```text
/// Idle ──build──> Building ──ok──> Built ──publish──> Publishing ──ok──> Published
///                    │                                    │
///                    └──────────────err──> Failed <──err──┘
/// ```
///
/// Terminal states (`Built`, `Published`, `Failed`) may start a new build or
/// publish. `Building` and `Publishing` only ever end in their success state
/// or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageState {
    /// No operation has run for the package in this pipeline.
    #[default]
    Idle,
    Building,
    /// Archives exist under the working tree.
    Built,
    Publishing,
    /// Archives were uploaded and the working tree removed.
    Published,
    /// The last operation failed with this kind.
    Failed(ErrorKind),
}

impl PackageState {
    /// Whether an operation is running for the package.
    pub fn is_busy(&self) -> bool {
        matches!(self, PackageState::Building | PackageState::Publishing)
    }

    pub fn can_transition_to(&self, next: PackageState) -> bool {
        match (self, next) {
            (PackageState::Building, PackageState::Built | PackageState::Failed(_)) => true,
            (PackageState::Publishing, PackageState::Published | PackageState::Failed(_)) => true,
            (current, PackageState::Building | PackageState::Publishing) => !current.is_busy(),
            _ => false,
        }
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageState::Idle => write!(f, "idle"),
            PackageState::Building => write!(f, "building"),
            PackageState::Built => write!(f, "built"),
            PackageState::Publishing => write!(f, "publishing"),
            PackageState::Published => write!(f, "published"),
            PackageState::Failed(kind) => write!(f, "failed ({:?})", kind),
        }
    }
}

/// Summary of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub package_number: String,
    pub sticker_count: usize,
    /// Tiered archives in density order, then scaled archives in scale order.
    pub artifacts: Vec<BuildArtifact>,
    pub built_at: DateTime<Utc>,
}

impl BuildReport {
    /// Total archive bytes across both platforms.
    pub fn total_size(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }
}

/// Where a publish put the package.
///
/// Serializes as `{"ios": {bucket, prefix}, "android": {bucket, prefix}}`,
/// plus a `mirror` object when a secondary destination was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub ios: StorageLocation,
    pub android: StorageLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<PlatformLocations>,
}
