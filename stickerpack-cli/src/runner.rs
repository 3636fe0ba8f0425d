//! CLI runner for common setup.
//!
//! Loads the config file, initializes logging and assembles the pipeline so
//! command handlers only deal with their own arguments.

use std::path::{Path, PathBuf};

use stickerpack::config::{config_file_path, ConfigFile};
use stickerpack::logging::{init_logging, LoggingGuard};
use stickerpack::StickerPipeline;
use tracing::info;

use crate::error::CliError;
use crate::store::CliStore;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    config: ConfigFile,
    config_path: PathBuf,
}

impl CliRunner {
    /// Load the config file at `config_path` (or the default path) and
    /// start logging.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config_file_path);
        let config = ConfigFile::load_from(&config_path)?;

        let logging_guard = init_logging(&config.logging.directory, &config.logging.file)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
            config_path,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!("Stickerpack v{}", env!("CARGO_PKG_VERSION"));
        info!(config = %self.config_path.display(), "Stickerpack CLI: {} command", command);
    }

    /// Build a pipeline over the configured object store.
    ///
    /// A mirror store is attached only when `[mirror]` is configured.
    pub fn pipeline(&self) -> Result<StickerPipeline<CliStore>, CliError> {
        let store = CliStore::primary(&self.config.storage)?;
        info!(store = %store.describe(), "Object store");

        let mut pipeline = StickerPipeline::new(store, self.config.pipeline.clone());
        if self.config.pipeline.mirror.is_some() {
            let mirror = CliStore::mirror(&self.config.storage)?;
            info!(store = %mirror.describe(), "Mirror object store");
            pipeline = pipeline.with_mirror_store(mirror);
        }
        Ok(pipeline)
    }
}
