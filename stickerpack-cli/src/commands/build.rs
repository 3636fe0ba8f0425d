//! Build command - produce both platform trees for a package.

use crate::commands::{cancel_on_ctrl_c, PackageArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the build command.
pub async fn run(runner: &CliRunner, args: PackageArgs) -> Result<(), CliError> {
    runner.log_startup("build");
    let (tenant, package) = args.load()?;
    let pipeline = runner.pipeline()?;

    cancel_on_ctrl_c(&pipeline)?;
    let report = pipeline.build(&tenant, &package).await?;

    println!("Built package {}", report.package_number);
    println!("  Stickers: {}", report.sticker_count);
    println!();
    for artifact in &report.artifacts {
        println!(
            "  {:<8} {:<8} {:>4} entries {:>10} bytes  {}",
            artifact.platform.to_string(),
            artifact.tier,
            artifact.entries,
            artifact.size,
            artifact.path.display()
        );
    }
    println!();
    println!("Run 'stickerpack publish' with the same package to upload.");
    Ok(())
}
