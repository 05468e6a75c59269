//! Manifest-url command - derive the manifest URL offline.

use anyhow::Result;
use regwatch_guest::ImageReference;

/// Run the manifest-url command.
pub fn run(image: &str) -> Result<()> {
    println!("{}", ImageReference::parse(image)?.manifest_url());
    Ok(())
}
