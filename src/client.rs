//! Worker-side client for the metrics socket.
//!
//! Mirrors what a server worker does: open the socket, write update lines,
//! and for a scrape send `metrics:` and read until the collector closes.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Client side timeout for one exchange.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends update lines followed by an empty line and waits for the collector
/// to close the connection, so the updates are applied on return.
pub async fn send_updates<S: AsRef<str>>(socket: &Path, lines: &[S]) -> Result<()> {
    let mut payload = String::new();
    for line in lines {
        payload.push_str(line.as_ref().trim_end_matches('\n'));
        payload.push('\n');
    }
    payload.push('\n');

    tokio::time::timeout(CLIENT_TIMEOUT, async {
        let mut stream = UnixStream::connect(socket)
            .await
            .with_context(|| format!("failed to connect to {}", socket.display()))?;
        stream
            .write_all(payload.as_bytes())
            .await
            .context("failed to send updates")?;
        stream.shutdown().await.ok();
        // the collector closes once it has consumed the empty line
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.ok();
        Ok::<(), anyhow::Error>(())
    })
    .await
    .context("timed out sending updates")?
}

/// Requests a metrics snapshot and returns it without the response terminator.
pub async fn scrape(socket: &Path) -> Result<String> {
    tokio::time::timeout(CLIENT_TIMEOUT, async {
        let mut stream = UnixStream::connect(socket)
            .await
            .with_context(|| format!("failed to connect to {}", socket.display()))?;
        stream
            .write_all(b"metrics:\n")
            .await
            .context("failed to send metrics request")?;
        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .await
            .context("failed to read metrics response")?;
        let trimmed = response.trim_end_matches('\n').len();
        response.truncate(trimmed);
        response.push('\n');
        Ok::<String, anyhow::Error>(response)
    })
    .await
    .context("timed out waiting for metrics")?
}
