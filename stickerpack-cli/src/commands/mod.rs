//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`build`] - Build both platform trees for a package
//! - [`config`] - Configuration management (path, show, init)
//! - [`publish`] - Upload a built package

pub mod build;
pub mod config;
pub mod publish;

use std::path::PathBuf;

use clap::Args;
use stickerpack::{StickerPackage, StickerPipeline, Tenant};

use crate::error::CliError;
use crate::store::CliStore;

/// Arguments shared by `build` and `publish`.
#[derive(Debug, Args)]
pub struct PackageArgs {
    /// Tenant bucket prefix (e.g. "acme" for acme-sticker-packages)
    #[arg(long)]
    pub tenant: String,

    /// Package model JSON file ({customerId, packageId, packageNumber, coordinates})
    #[arg(long)]
    pub package: PathBuf,
}

impl PackageArgs {
    pub fn load(&self) -> Result<(Tenant, StickerPackage), CliError> {
        let package = StickerPackage::load(&self.package)?;
        Ok((Tenant::new(self.tenant.trim()), package))
    }
}

/// Cancel the pipeline on Ctrl+C.
pub fn cancel_on_ctrl_c(pipeline: &StickerPipeline<CliStore>) -> Result<(), CliError> {
    let cancel = pipeline.cancellation_token();
    ctrlc::set_handler(move || {
        println!();
        println!("Received interrupt, cancelling...");
        cancel.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))
}
