//! Send command implementation.
//!
//! Writes protocol lines to a collector socket, the way a worker reports
//! at the end of a request.

use std::path::Path;

use httpd_metrics_collector::client::send_updates;
use httpd_metrics_collector::protocol::Command;

/// Validates and sends update lines.
pub async fn command_send(socket: &Path, lines: &[String]) -> anyhow::Result<()> {
    for line in lines {
        match Command::parse(line) {
            Ok(Command::Update(..)) => {}
            Ok(_) => anyhow::bail!("'{}' is not an update line", line),
            Err(e) => anyhow::bail!("{}", e),
        }
    }

    send_updates(socket, lines).await?;
    println!("✅ Sent {} update(s) to {}", lines.len(), socket.display());
    Ok(())
}
