//! Stickerpack CLI - Command-line interface
//!
//! Front end for the sticker package pipeline: build a package's platform
//! trees, publish them to object storage, and manage the config file.

mod commands;
mod error;
mod runner;
mod store;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::PackageArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "stickerpack")]
#[command(version, about = "Build and publish sticker packages", long_about = None)]
struct Cli {
    /// Config file (default: ~/.stickerpack/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch artwork and build both platform trees
    Build(PackageArgs),

    /// Upload a built package and print its locations as JSON
    Publish(PackageArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Config { command } => commands::config::run(command, config_path),
        Commands::Build(args) => {
            let runner = CliRunner::new(config_path)?;
            commands::build::run(&runner, args).await
        }
        Commands::Publish(args) => {
            let runner = CliRunner::new(config_path)?;
            commands::publish::run(&runner, args).await
        }
    }
}
