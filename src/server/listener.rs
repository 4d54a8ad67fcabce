//! Unix domain socket listener.
//!
//! Binding removes any stale socket file, creates the socket, hands its
//! ownership to the worker user and starts an accept loop. Every accepted
//! connection runs on its own task under a fixed deadline armed at accept.

use nix::unistd::{chown, Gid, Uid};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::ServiceError;
use crate::server::connection::{handle_connection, ConnectionContext};

/// Owner applied to the socket file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOwner {
    pub uid: Uid,
    pub gid: Gid,
}

impl SocketOwner {
    /// The effective user and group of this process.
    pub fn current() -> Self {
        Self {
            uid: nix::unistd::geteuid(),
            gid: nix::unistd::getegid(),
        }
    }
}

/// A bound socket with its accept loop.
pub struct MetricsListener {
    path: PathBuf,
    accept_task: JoinHandle<()>,
}

impl MetricsListener {
    /// Binds `path` and starts accepting. Must be called inside a tokio runtime.
    ///
    /// Returns once the socket exists, carries the requested owner and is
    /// accepting connections.
    pub fn bind(
        path: &Path,
        owner: SocketOwner,
        timeout: Duration,
        ctx: Arc<ConnectionContext>,
    ) -> Result<Self, ServiceError> {
        debug!(
            "binding metrics socket {} (uid: {}, gid: {})",
            path.display(),
            owner.uid,
            owner.gid
        );
        remove_socket_file(path).map_err(|source| ServiceError::BindFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let listener = UnixListener::bind(path).map_err(|source| ServiceError::BindFailed {
            path: path.to_path_buf(),
            source,
        })?;

        if let Err(source) = chown(path, Some(owner.uid), Some(owner.gid)) {
            let _ = remove_socket_file(path);
            return Err(ServiceError::ChownFailed {
                path: path.to_path_buf(),
                source,
            });
        }

        debug!("listening on metrics socket: {}", path.display());
        let accept_task = tokio::spawn(accept_loop(listener, timeout, ctx));

        Ok(Self {
            path: path.to_path_buf(),
            accept_task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops accepting. Connections already accepted keep running until they
    /// end or hit their deadline. The socket file is left in place.
    pub fn close(self) {
        self.accept_task.abort();
        debug!("closed listener on {}", self.path.display());
    }
}

async fn accept_loop(listener: UnixListener, timeout: Duration, ctx: Arc<ConnectionContext>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(e) => {
                error!("accept failed: {}", e);
                // avoid spinning on persistent errors such as EMFILE
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, handle_connection(stream, &ctx)).await {
                Ok(closed) => debug!("connection closed: {:?}", closed),
                Err(_) => warn!("connection exceeded its {:?} deadline", timeout),
            }
        });
    }
}

/// Removes a socket file; a missing file is not an error.
pub fn remove_socket_file(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_remove_socket_file_missing_is_ok() {
        let dir = tempdir().unwrap();
        assert!(remove_socket_file(&dir.path().join("nope.sock")).is_ok());
    }

    #[test]
    fn test_remove_socket_file_removes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        fs::write(&path, "").unwrap();
        remove_socket_file(&path).unwrap();
        assert!(!path.exists());
    }
}
