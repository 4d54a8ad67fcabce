//! Signal driven shutdown.
//!
//! Interrupt and terminate exit right away. A reload arms a deadline first:
//! the host starts a replacement collector concurrently, and this one keeps
//! answering on its socket until the grace window has passed.

use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use crate::service::StatusService;

/// Signals that end the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Reload,
}

/// How long to keep serving after `signal` before exiting.
pub fn exit_delay(signal: ShutdownSignal, reload_grace: Duration) -> Duration {
    match signal {
        ShutdownSignal::Interrupt | ShutdownSignal::Terminate => Duration::ZERO,
        ShutdownSignal::Reload => reload_grace,
    }
}

/// Waits for SIGINT, SIGTERM or SIGHUP.
pub async fn wait_for_signal() -> std::io::Result<ShutdownSignal> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let received = tokio::select! {
        _ = interrupt.recv() => ShutdownSignal::Interrupt,
        _ = terminate.recv() => ShutdownSignal::Terminate,
        _ = hangup.recv() => ShutdownSignal::Reload,
    };
    Ok(received)
}

/// Sleeps out the exit delay for `signal`, then tears the service down.
pub async fn shutdown_after(service: &StatusService, signal: ShutdownSignal, reload_grace: Duration) {
    let delay = exit_delay(signal, reload_grace);
    if !delay.is_zero() {
        info!(
            "got {:?}, serving for another {}s before exiting",
            signal,
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    } else {
        info!("got {:?}, exiting", signal);
    }
    service.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_delay() {
        let grace = Duration::from_secs(5);
        assert_eq!(exit_delay(ShutdownSignal::Interrupt, grace), Duration::ZERO);
        assert_eq!(exit_delay(ShutdownSignal::Terminate, grace), Duration::ZERO);
        assert_eq!(exit_delay(ShutdownSignal::Reload, grace), grace);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_waits_for_grace_window() {
        let service = StatusService::with_source(
            &crate::config::Config::default(),
            Box::new(crate::process::ProcFs::new("/nonexistent")),
            1,
        );
        let start = tokio::time::Instant::now();
        shutdown_after(&service, ShutdownSignal::Reload, Duration::from_secs(5)).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
