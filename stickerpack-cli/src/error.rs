//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and exit codes. Pipeline failures print their stable tag on stdout so
//! scripts can branch on it.

use std::fmt;
use std::process;

use stickerpack::config::ConfigFileError;
use stickerpack::storage::StorageError;
use stickerpack::{ErrorKind, PipelineError};

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to load or save the config file
    ConfigFile(ConfigFileError),
    /// Failed to set up the object store
    Storage(StorageError),
    /// Build or publish failed
    Pipeline(PipelineError),
}

impl CliError {
    /// Exit the process with an error message and code.
    pub fn exit(&self) -> ! {
        if let CliError::Pipeline(e) = self {
            println!("{}", e.tag());
        }
        eprintln!("Error: {}", self);

        match self {
            CliError::Pipeline(e) if e.kind() == ErrorKind::NotBuilt => {
                eprintln!();
                eprintln!("Run 'stickerpack build' for this package first.");
            }
            CliError::Storage(_) => {
                eprintln!();
                eprintln!("Check [storage] backend, endpoint and region in the config file,");
                eprintln!("and that AWS credentials are available in the environment.");
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }

    fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::ConfigFile(_) => 2,
            CliError::Pipeline(e) if e.kind() == ErrorKind::Config => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Storage(e) => write!(f, "Object store setup failed: {}", e),
            CliError::Pipeline(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Storage(e) => Some(e),
            CliError::Pipeline(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<PipelineError> for CliError {
    fn from(e: PipelineError) -> Self {
        CliError::Pipeline(e)
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Storage(e)
    }
}
