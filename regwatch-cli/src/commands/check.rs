//! Check command - resolve an image to its current digest.

use anyhow::{Context, Result};
use regwatch_host::{HostConfig, build_dispatcher};

/// Run the check command.
pub async fn run(config: &HostConfig, image: &str) -> Result<()> {
    tracing::info!(image = %image, "Checking image");

    let dispatcher = build_dispatcher(config)?;
    let status = dispatcher
        .check_image(image)
        .await
        .with_context(|| format!("Failed to check {image}"))?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    if !status.complete {
        tracing::warn!(image = %image, "No digest found");
    }
    Ok(())
}
