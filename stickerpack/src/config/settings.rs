//! Configuration structs and their defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limiter::default_image_workers;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};

// =============================================================================
// Defaults
// =============================================================================

/// Default staging directory for working trees.
pub const DEFAULT_WORK_DIR: &str = "uploads";

/// Suffix of the tenant bucket holding source artwork.
pub const DEFAULT_SOURCE_BUCKET_SUFFIX: &str = "console-data-management";

/// Suffix of the tenant bucket receiving published packages.
pub const DEFAULT_PACKAGE_BUCKET_SUFFIX: &str = "sticker-packages";

/// Deadline for a single asset fetch, in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Deadline for a single object upload, in seconds.
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;

/// Concurrent asset fetches per build.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Concurrent uploads per platform tree.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Default log directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "stickerpack.log";

// =============================================================================
// Pipeline
// =============================================================================

/// Secondary white-label publish destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Key prefix inside the mirror bucket.
    pub brand: String,
    pub bucket: String,
}

impl MirrorConfig {
    pub fn new(brand: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            bucket: bucket.into(),
        }
    }
}

/// Runtime settings of the build and publish pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Root of the package working trees.
    pub work_dir: PathBuf,

    pub source_bucket_suffix: String,

    pub package_bucket_suffix: String,

    /// Package bucket by tenant prefix, replacing the derived name.
    pub bucket_overrides: BTreeMap<String, String>,

    /// Mirror destination; only used when a mirror store is attached.
    pub mirror: Option<MirrorConfig>,

    pub fetch_timeout: Duration,

    pub upload_timeout: Duration,

    /// Attempts per storage call, including the first.
    pub retry_attempts: u32,

    pub fetch_concurrency: usize,

    pub upload_concurrency: usize,

    /// Concurrent image jobs on the blocking pool.
    pub image_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            source_bucket_suffix: DEFAULT_SOURCE_BUCKET_SUFFIX.to_string(),
            package_bucket_suffix: DEFAULT_PACKAGE_BUCKET_SUFFIX.to_string(),
            bucket_overrides: BTreeMap::new(),
            mirror: None,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            image_workers: default_image_workers(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration staging packages under `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    /// Route one tenant's packages to a fixed bucket.
    pub fn with_bucket_override(
        mut self,
        prefix: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        self.bucket_overrides.insert(prefix.into(), bucket.into());
        self
    }

    pub fn with_mirror(mut self, mirror: MirrorConfig) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self
    }

    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency;
        self
    }

    pub fn with_image_workers(mut self, workers: usize) -> Self {
        self.image_workers = workers;
        self
    }

    /// Bucket holding a tenant's source artwork.
    pub fn source_bucket(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.source_bucket_suffix)
    }

    /// Bucket receiving a tenant's packages, honouring overrides.
    pub fn package_bucket(&self, prefix: &str) -> String {
        match self.bucket_overrides.get(prefix) {
            Some(bucket) => bucket.clone(),
            None => format!("{}-{}", prefix, self.package_bucket_suffix),
        }
    }

    /// Retry policy for storage calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_attempts <= 1 {
            RetryPolicy::None
        } else {
            RetryPolicy::exponential(self.retry_attempts)
        }
    }
}

// =============================================================================
// Storage backend
// =============================================================================

/// Which [`ObjectStore`](crate::storage::ObjectStore) the CLI wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Directory per bucket under a local root.
    Local,
    /// S3 API, credentials from the standard AWS chain.
    S3,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "s3" => Ok(StorageBackend::S3),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Local => f.write_str("local"),
            StorageBackend::S3 => f.write_str("s3"),
        }
    }
}

/// Object store connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Root directory of the local backend.
    pub root: PathBuf,
    /// Endpoint of an S3-compatible service; AWS when unset.
    pub endpoint: Option<String>,
    /// Region override; otherwise resolved from the environment.
    pub region: Option<String>,
    /// Allow plain `http://` endpoints.
    pub allow_http: bool,
    /// Endpoint for the mirror destination; falls back to `endpoint`.
    pub mirror_endpoint: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            root: PathBuf::from("storage"),
            endpoint: None,
            region: None,
            allow_http: false,
            mirror_endpoint: None,
        }
    }
}

/// Log output location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_LOG_DIR),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

/// Everything stored in `config.ini`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    pub pipeline: PipelineConfig,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}
