//! Error types for the sticker package pipeline.
//!
//! Every failure inside the pipeline is reported as a [`PipelineError`]
//! carrying a closed [`ErrorKind`], so callers can branch on the kind rather
//! than on message text. [`PipelineError::tag`] gives the stable string tag
//! that external callers (REST layer, CLI exit output) report.

use std::fmt;
use std::io;
use std::path::Path;

use serde::Serialize;

use crate::storage::StorageError;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Target distribution platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Multi-density tiered platform ("android" keys).
    Android,
    /// Per-scale platform with a generated manifest ("ios" keys).
    Ios,
}

impl Platform {
    /// Key segment used for object-storage prefixes.
    pub fn key_segment(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_segment())
    }
}

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The layout document is malformed or was already normalized.
    InvalidLayout,
    /// A required source image could not be retrieved from storage.
    MissingAsset,
    /// The fetched asset set does not cover the required manifest.
    InvalidFiles,
    /// Decoding, resizing or writing an image failed.
    ImageProcessing,
    /// Folding a directory into an archive failed.
    Archive,
    /// Uploading to object storage failed.
    Upload,
    /// Removing a transient local directory failed.
    Cleanup,
    /// Publish was requested for a package without a local build.
    NotBuilt,
    /// The operation was cancelled.
    Cancelled,
    /// Configuration is invalid.
    Config,
}

/// Error raised by the pipeline.
#[derive(Debug)]
pub struct PipelineError {
    kind: ErrorKind,
    platform: Option<Platform>,
    context: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PipelineError {
    /// Create an error of the given kind with a context message.
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            platform: None,
            context: context.into(),
            source: None,
        }
    }

    /// Attach the platform the failure happened on.
    pub fn on(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn invalid_layout(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidLayout, context)
    }

    pub fn missing_asset(name: &str, source: StorageError) -> Self {
        Self::new(ErrorKind::MissingAsset, format!("asset '{}' unavailable", name))
            .with_source(source)
    }

    pub fn invalid_files(missing: &[String]) -> Self {
        Self::new(
            ErrorKind::InvalidFiles,
            format!("missing or empty source assets: {}", missing.join(", ")),
        )
    }

    pub fn image(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::ImageProcessing, context)
    }

    pub fn io(kind: ErrorKind, action: &str, path: &Path, source: io::Error) -> Self {
        Self::new(kind, format!("failed to {} {}", action, path.display())).with_source(source)
    }

    pub fn upload(bucket: &str, key: &str, source: StorageError) -> Self {
        Self::new(ErrorKind::Upload, format!("upload to {}/{} failed", bucket, key))
            .with_source(source)
    }

    pub fn not_built(package_number: &str) -> Self {
        Self::new(
            ErrorKind::NotBuilt,
            format!("package {} has no local build to publish", package_number),
        )
    }

    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, context)
    }

    /// The failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The platform the failure happened on, if known.
    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    /// Human-readable context.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Stable external tag for this error.
    ///
    /// Image failures on the tiered platform report `TIERED_BUILD_ERROR`;
    /// every other image failure reports `STICKER_FILE_PROCESS_ERROR`.
    pub fn tag(&self) -> &'static str {
        match (self.kind, self.platform) {
            (ErrorKind::InvalidLayout, _) => "INVALID_LAYOUT",
            (ErrorKind::MissingAsset, _) => "MISSING_ASSET",
            (ErrorKind::InvalidFiles, _) => "INVALID_FILES",
            (ErrorKind::ImageProcessing, Some(Platform::Android)) => "TIERED_BUILD_ERROR",
            (ErrorKind::ImageProcessing, _) => "STICKER_FILE_PROCESS_ERROR",
            (ErrorKind::Archive, _) => "STICKER_ARCHIVE_ERROR",
            (ErrorKind::Upload, _) => "STICKER_UPLOAD_ERROR",
            (ErrorKind::Cleanup, _) => "CLEANUP_ERROR",
            (ErrorKind::NotBuilt, _) => "NOT_BUILT",
            (ErrorKind::Cancelled, _) => "CANCELLED",
            (ErrorKind::Config, _) => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.platform {
            Some(platform) => write!(f, "{} [{}]: {}", self.tag(), platform, self.context)?,
            None => write!(f, "{}: {}", self.tag(), self.context)?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
