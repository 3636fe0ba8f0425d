//! Package model consumed by the pipeline.
//!
//! The model is owned by catalog management; the pipeline only reads it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::builder::SCALED_ROOT_SUFFIX;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::layout::Layout;

/// A tenant, identified by the prefix of its bucket names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tenant {
    prefix: String,
}

impl Tenant {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// A customer's sticker package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerPackage {
    pub customer_id: String,
    pub package_id: String,
    /// Human-readable folder and key stem.
    pub package_number: String,
    #[serde(alias = "coords")]
    pub coordinates: Layout,
}

impl StickerPackage {
    pub fn new(
        customer_id: impl Into<String>,
        package_id: impl Into<String>,
        package_number: impl Into<String>,
        coordinates: Layout,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            package_id: package_id.into(),
            package_number: package_number.into(),
            coordinates,
        }
    }

    /// Load a package model from a JSON file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::io(ErrorKind::Config, "read package model", path, e)
        })?;
        let package: Self = serde_json::from_str(&content)
            .map_err(|e| PipelineError::invalid_layout(format!("{}: {}", path.display(), e)))?;
        package.validate()?;
        Ok(package)
    }

    /// Reject package numbers that cannot be used as a folder name or key stem.
    ///
    /// A number ending in the scaled-root suffix is also rejected: its
    /// tiered root would be another package's scaled root.
    pub fn validate(&self) -> PipelineResult<()> {
        let pn = &self.package_number;
        let valid = !pn.is_empty()
            && pn != "."
            && pn != ".."
            && pn
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(PipelineError::new(
                ErrorKind::InvalidLayout,
                format!("invalid package number '{}'", pn),
            ));
        }
        if pn.to_ascii_uppercase().ends_with(SCALED_ROOT_SUFFIX) {
            return Err(PipelineError::new(
                ErrorKind::InvalidLayout,
                format!(
                    "package number '{}' must not end in '{}'",
                    pn, SCALED_ROOT_SUFFIX
                ),
            ));
        }
        if self.package_id.is_empty() || self.package_id.contains('/') {
            return Err(PipelineError::new(
                ErrorKind::InvalidLayout,
                format!("invalid package id '{}'", self.package_id),
            ));
        }
        Ok(())
    }
}
