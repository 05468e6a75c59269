//! Fetch command - a bare GET through the guest.

use anyhow::Result;
use regwatch_core::codec::Response;
use regwatch_host::{HostConfig, build_dispatcher};

/// Run the fetch command.
pub async fn run(config: &HostConfig, url: &str) -> Result<()> {
    let dispatcher = build_dispatcher(config)?;
    let response = dispatcher.get(url).await?;
    print!("{}", render(&response));
    Ok(())
}

/// Status line, headers by name and the body size.
pub fn render(response: &Response) -> String {
    let mut out = format!("Status: {}\n", response.status);

    if let Some(headers) = response.headers.as_ref().filter(|h| !h.is_empty()) {
        out.push_str("Headers:\n");
        for (name, value) in headers {
            out.push_str(&format!("  {name}: {value}\n"));
        }
    }

    out.push_str(&format!("Body: {} bytes\n", response.body_bytes().len()));
    out
}
