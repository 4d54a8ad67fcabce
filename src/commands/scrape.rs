//! Scrape command implementation.

use std::path::Path;

use httpd_metrics_collector::client::scrape;

/// Prints the collector's current exposition payload.
pub async fn command_scrape(socket: &Path) -> anyhow::Result<()> {
    let text = scrape(socket).await?;
    print!("{}", text);
    Ok(())
}
