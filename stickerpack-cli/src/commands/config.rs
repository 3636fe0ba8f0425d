//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show` and `config init`.

use std::path::Path;

use clap::Subcommand;
use stickerpack::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration
    Show,

    /// Write a default configuration file if none exists
    Init,
}

/// Run a config subcommand.
///
/// These commands do not start logging; they only touch the config file.
pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);
    match command {
        ConfigCommands::Path => run_path(&path),
        ConfigCommands::Show => run_show(&path),
        ConfigCommands::Init => run_init(&path),
    }
}

fn run_path(path: &Path) -> Result<(), CliError> {
    println!("{}", path.display());
    Ok(())
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;
    let pipeline = &config.pipeline;
    let storage = &config.storage;

    println!("Configuration ({})", path.display());
    println!("======================");
    println!();
    println!("[pipeline]");
    println!("  work_dir = {}", pipeline.work_dir.display());
    println!("  image_workers = {}", pipeline.image_workers);
    println!("  fetch_concurrency = {}", pipeline.fetch_concurrency);
    println!("  upload_concurrency = {}", pipeline.upload_concurrency);
    println!();
    println!("[storage]");
    println!("  backend = {}", storage.backend);
    println!("  root = {}", storage.root.display());
    println!("  endpoint = {}", storage.endpoint.as_deref().unwrap_or("(not set)"));
    println!("  region = {}", storage.region.as_deref().unwrap_or("(from environment)"));
    println!("  allow_http = {}", storage.allow_http);
    println!("  source buckets = <tenant>-{}", pipeline.source_bucket_suffix);
    println!("  package buckets = <tenant>-{}", pipeline.package_bucket_suffix);
    println!("  fetch_timeout = {}s", pipeline.fetch_timeout.as_secs());
    println!("  upload_timeout = {}s", pipeline.upload_timeout.as_secs());
    println!("  retry_attempts = {}", pipeline.retry_attempts);
    println!();
    println!("[mirror]");
    match &pipeline.mirror {
        Some(mirror) => {
            println!("  brand = {}", mirror.brand);
            println!("  bucket = {}", mirror.bucket);
        }
        None => println!("  (disabled)"),
    }
    if !pipeline.bucket_overrides.is_empty() {
        println!();
        println!("[bucket_overrides]");
        for (prefix, bucket) in &pipeline.bucket_overrides {
            println!("  {} = {}", prefix, bucket);
        }
    }
    println!();
    println!("[logging]");
    println!(
        "  file = {}",
        config.logging.directory.join(&config.logging.file).display()
    );
    Ok(())
}

fn run_init(path: &Path) -> Result<(), CliError> {
    if ConfigFile::ensure_exists_at(path)? {
        println!("Created configuration file: {}", path.display());
    } else {
        println!("Configuration file already exists: {}", path.display());
    }
    println!();
    println!("Edit this file to point the pipeline at your object store.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_show() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");

        run(ConfigCommands::Init, Some(path.as_path())).unwrap();
        assert!(path.exists());
        run(ConfigCommands::Show, Some(path.as_path())).unwrap();
    }

    #[test]
    fn test_show_reports_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[storage]\nbackend = ftp\n").unwrap();

        let err = run(ConfigCommands::Show, Some(path.as_path())).unwrap_err();
        assert!(matches!(err, CliError::ConfigFile(_)));
    }
}
