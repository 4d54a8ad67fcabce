//! Service lifecycle: registration, binding, rotation and teardown.
//!
//! [`StatusService`] is what the embedding host talks to. The registry is
//! built on the first [`StatusService::initialize`] call and reused by every
//! later call, so counters survive reloads. Each call (re)binds the socket:
//! the previous listener stops accepting and the new one is accepting before
//! the call returns.

use nix::unistd::{Gid, Group, Uid, User};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{
    split_label_names, Config, DEFAULT_CONCURRENCY_MODEL, DEFAULT_LABEL_NAMES, DEFAULT_MPM_NAME,
    DEFAULT_SERVER_DESCRIPTION, DEFAULT_SERVER_NAME, DEFAULT_SIZE_BUCKETS, DEFAULT_SOCKET_DIR,
    DEFAULT_TIME_BUCKETS,
};
use crate::error::ServiceError;
use crate::metrics::{MetricSchema, ServerInfo, StatusMetrics};
use crate::process::{monitored_root_pid, ProcFs, ProcSampler, ProcessSource};
use crate::server::{remove_socket_file, ConnectionContext, MetricsListener, SocketOwner};

/// Arguments of one initialization call from the embedding host.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub server: ServerInfo,
    /// `;`-joined request label names.
    pub label_names: String,
    pub socket_dir: PathBuf,
    /// `;`-joined response time buckets.
    pub time_buckets: String,
    /// `;`-joined response size buckets.
    pub size_buckets: String,
    pub owner: SocketOwner,
    pub socket_timeout: Duration,
}

impl InitOptions {
    /// Builds init options from the effective configuration.
    pub fn from_config(cfg: &Config) -> Result<Self, ServiceError> {
        let uid = match cfg.socket_user.as_deref() {
            Some(user) => resolve_user(user)?,
            None => nix::unistd::geteuid(),
        };
        let gid = match cfg.socket_group.as_deref() {
            Some(group) => resolve_group(group)?,
            None => nix::unistd::getegid(),
        };

        let or_default = |value: &Option<String>, default: &str| {
            value.clone().unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            server: ServerInfo {
                description: or_default(&cfg.server_description, DEFAULT_SERVER_DESCRIPTION),
                host_name: or_default(&cfg.server_name, DEFAULT_SERVER_NAME),
                mpm_name: or_default(&cfg.mpm_name, DEFAULT_MPM_NAME),
                concurrency_model: or_default(&cfg.concurrency_model, DEFAULT_CONCURRENCY_MODEL),
            },
            label_names: or_default(&cfg.label_names, DEFAULT_LABEL_NAMES),
            socket_dir: cfg
                .socket_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_DIR)),
            time_buckets: or_default(&cfg.time_buckets, DEFAULT_TIME_BUCKETS),
            size_buckets: or_default(&cfg.size_buckets, DEFAULT_SIZE_BUCKETS),
            owner: SocketOwner { uid, gid },
            socket_timeout: cfg.socket_timeout(),
        })
    }

    /// Path of the socket inside `socket_dir`, unique per collector process.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir
            .join(format!("httpd_metrics.{}.sock", std::process::id()))
    }
}

/// Resolves a user name or numeric uid.
pub fn resolve_user(user: &str) -> Result<Uid, ServiceError> {
    if let Ok(id) = user.parse::<u32>() {
        return Ok(Uid::from_raw(id));
    }
    match User::from_name(user) {
        Ok(Some(u)) => Ok(u.uid),
        _ => Err(ServiceError::UnknownOwner(user.to_string())),
    }
}

/// Resolves a group name or numeric gid.
pub fn resolve_group(group: &str) -> Result<Gid, ServiceError> {
    if let Ok(id) = group.parse::<u32>() {
        return Ok(Gid::from_raw(id));
    }
    match Group::from_name(group) {
        Ok(Some(g)) => Ok(g.gid),
        _ => Err(ServiceError::UnknownOwner(group.to_string())),
    }
}

/// The collector service: one registry, one sampler, at most one listener.
pub struct StatusService {
    metrics: OnceCell<Arc<StatusMetrics>>,
    sampler: Arc<ProcSampler>,
    listener: Mutex<Option<MetricsListener>>,
}

impl StatusService {
    pub fn new(sampler: ProcSampler) -> Self {
        Self {
            metrics: OnceCell::new(),
            sampler: Arc::new(sampler),
            listener: Mutex::new(None),
        }
    }

    /// Service sampling the live process tree above this process.
    pub fn from_config(cfg: &Config) -> Self {
        Self::with_source(cfg, Box::new(ProcFs::default()), monitored_root_pid())
    }

    /// Service sampling an arbitrary process source from `root`.
    pub fn with_source(cfg: &Config, source: Box<dyn ProcessSource>, root: u32) -> Self {
        Self::new(ProcSampler::new(
            source,
            root,
            cfg.process_match(),
            cfg.proc_update_interval(),
        ))
    }

    /// Registers the metrics (first call only) and binds the socket, closing
    /// any previous listener. Returns the bound socket path.
    ///
    /// When the socket path changes, the new listener is bound first and the
    /// previous one is only closed once that succeeded, so a failed rotation
    /// leaves the old socket serving. Rebinding the same path has to release
    /// it first; a failure there leaves the service without a listener.
    pub async fn initialize(&self, opts: &InitOptions) -> Result<PathBuf, ServiceError> {
        let metrics = self.metrics_or_register(opts)?;

        let mut current = self.listener.lock().await;
        let path = opts.socket_path();
        let ctx = Arc::new(ConnectionContext::new(metrics, self.sampler.clone()));

        let same_path = current.as_ref().is_some_and(|l| l.path() == path.as_path());
        if same_path {
            if let Some(previous) = current.take() {
                info!("rebinding metrics socket {}", path.display());
                previous.close();
            }
        }

        let listener = MetricsListener::bind(&path, opts.owner, opts.socket_timeout, ctx)?;
        if let Some(previous) = current.replace(listener) {
            let old_path = previous.path().to_path_buf();
            info!("rotated metrics socket {} -> {}", old_path.display(), path.display());
            previous.close();
            if let Err(e) = remove_socket_file(&old_path) {
                warn!("cannot remove old socket {}: {}", old_path.display(), e);
            }
        }
        Ok(path)
    }

    fn metrics_or_register(&self, opts: &InitOptions) -> Result<Arc<StatusMetrics>, ServiceError> {
        if let Some(metrics) = self.metrics.get() {
            debug!("metrics already registered, keeping existing registry");
            return Ok(metrics.clone());
        }
        let metrics = self.metrics.get_or_try_init(|| {
            let schema = MetricSchema::from_lists(
                opts.server.clone(),
                split_label_names(&opts.label_names),
                &opts.time_buckets,
                &opts.size_buckets,
            )?;
            StatusMetrics::new(&schema).map(Arc::new)
        })?;
        Ok(metrics.clone())
    }

    /// The registry, once initialized.
    pub fn metrics(&self) -> Option<Arc<StatusMetrics>> {
        self.metrics.get().cloned()
    }

    pub fn sampler(&self) -> &Arc<ProcSampler> {
        &self.sampler
    }

    /// Path of the currently bound socket.
    pub async fn socket_path(&self) -> Option<PathBuf> {
        self.listener
            .lock()
            .await
            .as_ref()
            .map(|l| l.path().to_path_buf())
    }

    /// Stops accepting and removes the socket file.
    pub async fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            let path = listener.path().to_path_buf();
            listener.close();
            remove_socket(&path);
        }
    }
}

fn remove_socket(path: &Path) {
    match remove_socket_file(path) {
        Ok(()) => debug!("removed metrics socket {}", path.display()),
        Err(e) => warn!("cannot remove metrics socket {}: {}", path.display(), e),
    }
}
