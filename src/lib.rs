//! httpd-metrics-collector library
//!
//! A sidecar metrics aggregator for multi-process web servers. Worker
//! processes report server and request measurements as text lines over a
//! Unix domain socket; the collector folds them into a Prometheus registry,
//! adds resource usage of the server's process tree and answers `metrics:`
//! requests with the text exposition format.
//!
//! # Usage
//!
//! ```rust,no_run
//! use httpd_metrics_collector::{Config, InitOptions, StatusService};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let service = StatusService::from_config(&config);
//! let socket = service.initialize(&InitOptions::from_config(&config)?).await?;
//! println!("collector listening on {}", socket.display());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod process;
pub mod protocol;
pub mod render;
pub mod server;
pub mod service;
pub mod shutdown;

// Re-export main types for convenience
pub use config::{expand_buckets, Config};
pub use error::{ConfigError, ProtocolError, RegistryError, ServiceError, UpdateError};
pub use metrics::{Collector, MetricSchema, Scope, ServerInfo, StatusMetrics};
pub use process::{ProcSample, ProcSampler};
pub use service::{InitOptions, StatusService};
pub use shutdown::ShutdownSignal;
