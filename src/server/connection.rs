//! Per-connection protocol handling.
//!
//! A connection is read line by line. Updates are applied in order and the
//! loop continues; `metrics:` renders the registry, writes it and ends the
//! connection, as does an empty line, EOF, a read error or an unknown verb.
//! Closing is the normal way out and is never reported as an error upward.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, instrument};

use crate::metrics::StatusMetrics;
use crate::process::ProcSampler;
use crate::protocol::{apply_update, Command};
use crate::render::render;

/// Shared state every connection handler works against.
pub struct ConnectionContext {
    pub metrics: Arc<StatusMetrics>,
    pub sampler: Arc<ProcSampler>,
}

impl ConnectionContext {
    pub fn new(metrics: Arc<StatusMetrics>, sampler: Arc<ProcSampler>) -> Self {
        Self { metrics, sampler }
    }

    /// Refreshes process gauges (throttled) and renders the registry.
    pub async fn snapshot(&self) -> Vec<u8> {
        let metrics = self.metrics.clone();
        let sampler = self.sampler.clone();
        let refresh = tokio::task::spawn_blocking(move || sampler.refresh_if_due(&metrics)).await;
        if let Err(e) = refresh {
            error!("process sampling task failed: {}", e);
        }
        render(&self.metrics)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// Client sent an empty line or closed its side.
    EndOfInput,
    /// A `metrics:` response was written.
    Served,
    /// Unknown verb.
    ProtocolError,
    /// Reading or writing failed.
    IoError,
}

/// Runs the protocol loop on one connection until it ends.
#[instrument(skip_all)]
pub async fn handle_connection<S>(stream: S, ctx: &ConnectionContext) -> Closed
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return Closed::EndOfInput,
            Ok(_) => {}
            Err(e) => {
                error!("Reading client error: {}", e);
                return Closed::IoError;
            }
        }

        match Command::parse(&line) {
            Ok(Command::End) => return Closed::EndOfInput,
            Ok(Command::Update(scope, payload)) => apply_update(&ctx.metrics, scope, payload),
            Ok(Command::Metrics) => {
                let payload = ctx.snapshot().await;
                let stream = reader.get_mut();
                if let Err(e) = stream.write_all(&payload).await {
                    error!("Writing client error: {}", e);
                    return Closed::IoError;
                }
                if let Err(e) = stream.flush().await {
                    error!("Writing client error: {}", e);
                    return Closed::IoError;
                }
                if let Err(e) = stream.shutdown().await {
                    debug!("shutting down client stream: {}", e);
                }
                debug!("served metrics ({} bytes)", payload.len());
                return Closed::Served;
            }
            Err(e) => {
                error!("{}", e);
                return Closed::ProtocolError;
            }
        }
    }
}
