//! Configuration management for httpd-metrics-collector.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats. It also owns the
//! parsers for the `;`-joined lists the embedding host hands over (label names
//! and histogram buckets).

use crate::cli::{Args, ConfigFormat};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// Default configuration constants
pub const DEFAULT_SOCKET_DIR: &str = "/tmp";
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_PROC_UPDATE_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_RELOAD_GRACE_SECS: u64 = 5;
pub const DEFAULT_LABEL_NAMES: &str = "method;status;label";
pub const DEFAULT_TIME_BUCKETS: &str = "0.01;0.1;1;10;30";
pub const DEFAULT_SIZE_BUCKETS: &str = "1000;10000;100000;1000000;10000000;100000000";
pub const DEFAULT_SERVER_DESCRIPTION: &str = "Apache/2.4";
pub const DEFAULT_SERVER_NAME: &str = "localhost";
pub const DEFAULT_MPM_NAME: &str = "event";
pub const DEFAULT_CONCURRENCY_MODEL: &str = "threaded";

/// Collector configuration. Fields missing from a file take their value
/// from [`Config::default`], so partial files merge over the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Socket
    #[serde(alias = "socket-dir")]
    pub socket_dir: Option<PathBuf>,
    #[serde(alias = "socket-user")]
    pub socket_user: Option<String>,
    #[serde(alias = "socket-group")]
    pub socket_group: Option<String>,
    #[serde(alias = "socket-timeout")]
    pub socket_timeout_secs: Option<u64>,

    // Server description
    #[serde(alias = "server-description")]
    pub server_description: Option<String>,
    #[serde(alias = "server-name")]
    pub server_name: Option<String>,
    #[serde(alias = "mpm-name")]
    pub mpm_name: Option<String>,
    #[serde(alias = "concurrency-model")]
    pub concurrency_model: Option<String>,

    // Metric schema
    /// `;`-joined request label names
    #[serde(alias = "label-names")]
    pub label_names: Option<String>,
    /// `;`-joined response time buckets in seconds
    #[serde(alias = "time-buckets")]
    pub time_buckets: Option<String>,
    /// `;`-joined response size buckets in bytes
    #[serde(alias = "size-buckets")]
    pub size_buckets: Option<String>,

    // Process sampling
    #[serde(alias = "proc-update-interval")]
    pub proc_update_interval_secs: Option<u64>,
    #[serde(alias = "process-match")]
    pub process_match: Option<Vec<String>>,

    // Lifecycle
    #[serde(alias = "reload-grace")]
    pub reload_grace_secs: Option<u64>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_dir: Some(PathBuf::from(DEFAULT_SOCKET_DIR)),
            socket_user: None,
            socket_group: None,
            socket_timeout_secs: Some(DEFAULT_SOCKET_TIMEOUT_SECS),
            server_description: Some(DEFAULT_SERVER_DESCRIPTION.into()),
            server_name: Some(DEFAULT_SERVER_NAME.into()),
            mpm_name: Some(DEFAULT_MPM_NAME.into()),
            concurrency_model: Some(DEFAULT_CONCURRENCY_MODEL.into()),
            label_names: Some(DEFAULT_LABEL_NAMES.into()),
            time_buckets: Some(DEFAULT_TIME_BUCKETS.into()),
            size_buckets: Some(DEFAULT_SIZE_BUCKETS.into()),
            proc_update_interval_secs: Some(DEFAULT_PROC_UPDATE_INTERVAL_SECS),
            process_match: Some(vec!["httpd".into(), "apache".into()]),
            reload_grace_secs: Some(DEFAULT_RELOAD_GRACE_SECS),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(
            self.socket_timeout_secs
                .unwrap_or(DEFAULT_SOCKET_TIMEOUT_SECS),
        )
    }

    pub fn proc_update_interval(&self) -> Duration {
        Duration::from_secs(
            self.proc_update_interval_secs
                .unwrap_or(DEFAULT_PROC_UPDATE_INTERVAL_SECS),
        )
    }

    pub fn reload_grace(&self) -> Duration {
        Duration::from_secs(self.reload_grace_secs.unwrap_or(DEFAULT_RELOAD_GRACE_SECS))
    }

    pub fn process_match(&self) -> Vec<String> {
        self.process_match
            .clone()
            .unwrap_or_else(|| vec!["httpd".into(), "apache".into()])
    }
}

/// Parses a `;`-joined list of bucket boundaries.
///
/// Any token that does not parse as a float fails the whole list; no partial
/// result is returned.
pub fn expand_buckets(input: &str) -> Result<Vec<f64>, ConfigError> {
    input
        .split(';')
        .map(|token| {
            let token = token.trim();
            token.parse::<f64>().map_err(|_| ConfigError::InvalidBucket {
                input: input.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}

/// Splits the `;`-joined request label names. Blank input yields no labels.
pub fn split_label_names(input: &str) -> Vec<String> {
    let input = input.trim();
    if input.is_empty() {
        return Vec::new();
    }
    input.split(';').map(|s| s.trim().to_string()).collect()
}

/// Parses a bucket list and checks it is strictly ascending.
pub fn parse_bucket_list(input: &str) -> Result<Vec<f64>, ConfigError> {
    let buckets = expand_buckets(input)?;
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::UnsortedBuckets(input.to_string()));
    }
    Ok(buckets)
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.socket_timeout_secs == Some(0) {
        return Err(ConfigError::Invalid(
            "socket_timeout_secs must be greater than zero".into(),
        ));
    }

    parse_bucket_list(cfg.time_buckets.as_deref().unwrap_or(DEFAULT_TIME_BUCKETS))?;
    parse_bucket_list(cfg.size_buckets.as_deref().unwrap_or(DEFAULT_SIZE_BUCKETS))?;

    if let Some(patterns) = &cfg.process_match {
        if patterns.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "process_match needs at least one non-empty pattern".into(),
            ));
        }
    }

    if let Some(dir) = &cfg.socket_dir {
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("socket_dir must not be empty".into()));
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(dir) = &args.socket_dir {
        config.socket_dir = Some(dir.clone());
    }
    if let Some(user) = &args.user {
        config.socket_user = Some(user.clone());
    }
    if let Some(group) = &args.group {
        config.socket_group = Some(group.clone());
    }
    if let Some(timeout) = args.socket_timeout {
        config.socket_timeout_secs = Some(timeout);
    }
    if let Some(desc) = &args.server_description {
        config.server_description = Some(desc.clone());
    }
    if let Some(name) = &args.server_name {
        config.server_name = Some(name.clone());
    }
    if let Some(mpm) = &args.mpm {
        config.mpm_name = Some(mpm.clone());
    }
    if let Some(model) = &args.concurrency_model {
        config.concurrency_model = Some(model.clone());
    }
    if let Some(labels) = &args.label_names {
        config.label_names = Some(labels.clone());
    }
    if let Some(buckets) = &args.time_buckets {
        config.time_buckets = Some(buckets.clone());
    }
    if let Some(buckets) = &args.size_buckets {
        config.size_buckets = Some(buckets.clone());
    }
    if let Some(interval) = args.proc_update_interval {
        config.proc_update_interval_secs = Some(interval);
    }
    if let Some(grace) = args.reload_grace {
        config.reload_grace_secs = Some(grace);
    }

    // Parse comma-separated process match patterns
    if let Some(patterns) = &args.process_match {
        config.process_match = Some(
            patterns
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        );
    }

    Ok(config)
}

/// Loads a config file, trying the default locations when no path is given.
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let defaults = [
                "/etc/httpd-metrics-collector/config.yaml",
                "/etc/httpd-metrics-collector/config.yml",
                "/etc/httpd-metrics-collector/config.json",
                "./httpd-metrics-collector.yaml",
                "./httpd-metrics-collector.yml",
                "./httpd-metrics-collector.json",
            ];

            match defaults.iter().find(|p| Path::new(p).exists()) {
                Some(p) => PathBuf::from(p),
                None => return Ok(Config::default()),
            }
        }
    };

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;
    let config = parse_config(&content, path.extension().and_then(|s| s.to_str()))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses config text; the extension picks the format, YAML otherwise.
pub fn parse_config(
    content: &str,
    extension: Option<&str>,
) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match extension {
        Some("json") => serde_json::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        _ => serde_yaml::from_str(content)?,
    };
    Ok(config)
}

/// Renders configuration in the requested format.
pub fn render_config(
    config: &Config,
    format: ConfigFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}
