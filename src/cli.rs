//! CLI arguments and subcommands for httpd-metrics-collector.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "httpd-metrics-collector",
    about = "Prometheus metrics aggregator for multi-process web servers",
    long_about = "Prometheus metrics aggregator for multi-process web servers.\n\n\
                  Worker processes report server and request measurements over a Unix \
                  domain socket; the collector aggregates them together with process \
                  tree resource usage and serves the Prometheus text exposition format \
                  on the same socket.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level (overrides the config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Shortcut for --log-level debug
    #[arg(long)]
    pub debug: bool,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Directory the metrics socket is created in
    #[arg(long)]
    pub socket_dir: Option<PathBuf>,

    /// Owner of the metrics socket (name or uid)
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Group of the metrics socket (name or gid)
    #[arg(short = 'g', long)]
    pub group: Option<String>,

    /// Per-connection deadline in seconds
    #[arg(long)]
    pub socket_timeout: Option<u64>,

    /// Server description reported in apache_server_info
    #[arg(long)]
    pub server_description: Option<String>,

    /// Server host name reported in apache_server_name
    #[arg(long)]
    pub server_name: Option<String>,

    /// MPM name reported in apache_server_info
    #[arg(long)]
    pub mpm: Option<String>,

    /// Concurrency model reported in apache_server_info
    #[arg(long)]
    pub concurrency_model: Option<String>,

    /// Request label names (semicolon-separated)
    #[arg(long)]
    pub label_names: Option<String>,

    /// Response time histogram buckets in seconds (semicolon-separated)
    #[arg(long)]
    pub time_buckets: Option<String>,

    /// Response size histogram buckets in bytes (semicolon-separated)
    #[arg(long)]
    pub size_buckets: Option<String>,

    /// Minimum seconds between process tree samples
    #[arg(long)]
    pub proc_update_interval: Option<u64>,

    /// Command line patterns identifying server processes (comma-separated)
    #[arg(long)]
    pub process_match: Option<String>,

    /// Seconds to keep answering after a reload signal
    #[arg(long)]
    pub reload_grace: Option<u64>,
}

/// Subcommands for talking to a running collector
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send update lines to a running collector
    Send {
        /// Path of the metrics socket
        #[arg(short = 's', long)]
        socket: PathBuf,

        /// Protocol lines, e.g. "request:promRequests;1;GET;200"
        #[arg(required = true)]
        lines: Vec<String>,
    },

    /// Fetch and print the current metrics
    Scrape {
        /// Path of the metrics socket
        #[arg(short = 's', long)]
        socket: PathBuf,
    },
}
