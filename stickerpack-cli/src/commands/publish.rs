//! Publish command - upload a built package and print where it went.

use stickerpack::PublishOutcome;

use crate::commands::{cancel_on_ctrl_c, PackageArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the publish command.
///
/// Prints the publish result as JSON on stdout:
/// `{"ios": {"bucket", "prefix"}, "android": {"bucket", "prefix"}}`.
pub async fn run(runner: &CliRunner, args: PackageArgs) -> Result<(), CliError> {
    runner.log_startup("publish");
    let (tenant, package) = args.load()?;
    let pipeline = runner.pipeline()?;

    cancel_on_ctrl_c(&pipeline)?;
    let outcome = pipeline.publish(&tenant, &package).await?;

    println!("{}", render(&outcome)?);
    Ok(())
}

fn render(outcome: &PublishOutcome) -> Result<String, CliError> {
    serde_json::to_string_pretty(outcome)
        .map_err(|e| CliError::Config(format!("Failed to render publish result: {}", e)))
}
