//! Error types shared across the collector.
//!
//! Each layer has its own enum so callers can tell a fatal startup failure
//! (configuration, bind, chown) apart from the local, per-connection errors
//! that are only ever logged.

use std::path::PathBuf;

/// Errors raised while reading or validating configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bucket value '{token}' in '{input}'")]
    InvalidBucket { input: String, token: String },

    #[error("bucket list '{0}' is not strictly ascending")]
    UnsortedBuckets(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while building the metric registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("metric '{0}' registered twice")]
    DuplicateRegistration(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Errors raised when applying a single update to the registry.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("metric '{name}' rejected labels {labels:?}: {source}")]
    LabelMismatch {
        name: String,
        labels: Vec<String>,
        #[source]
        source: prometheus::Error,
    },

    #[error("counter '{name}' cannot be increased by {value}")]
    InvalidIncrement { name: String, value: f64 },
}

/// Errors raised while parsing a protocol line.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown metrics update request: {0}")]
    UnknownCommand(String),
}

/// Errors surfaced to the embedding host by the service lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to initialize metrics: {0}")]
    Registry(#[from] RegistryError),

    #[error("listen error on {path}: {source}")]
    BindFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot chown metrics socket {path}: {source}")]
    ChownFailed {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("cannot resolve socket owner '{0}'")]
    UnknownOwner(String),
}
