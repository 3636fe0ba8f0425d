//! Pipeline configuration.
//!
//! [`PipelineConfig`] carries the runtime knobs of the build and publish
//! pipeline and is assembled with `with_*` builder methods. [`ConfigFile`]
//! adds the storage and logging settings a front end needs, and round-trips
//! through `~/.stickerpack/config.ini`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use stickerpack::config::{MirrorConfig, PipelineConfig};
//!
//! let config = PipelineConfig::new("/tmp/uploads")
//!     .with_bucket_override("legacy", "legacy-stickers")
//!     .with_mirror(MirrorConfig::new("brandx", "whitelabel-packages"))
//!     .with_upload_timeout(Duration::from_secs(60));
//!
//! assert_eq!(config.package_bucket("legacy"), "legacy-stickers");
//! ```

mod file;
mod parser;
mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, LoggingSettings, MirrorConfig, PipelineConfig, StorageBackend, StorageSettings,
    DEFAULT_FETCH_CONCURRENCY, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_LOG_DIR, DEFAULT_LOG_FILE,
    DEFAULT_PACKAGE_BUCKET_SUFFIX, DEFAULT_SOURCE_BUCKET_SUFFIX, DEFAULT_UPLOAD_CONCURRENCY,
    DEFAULT_UPLOAD_TIMEOUT_SECS, DEFAULT_WORK_DIR,
};
