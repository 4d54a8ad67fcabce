//! httpd-metrics-collector
//!
//! Embedding host for the collector service: resolves configuration, binds
//! the metrics socket and runs until a shutdown signal arrives.

mod commands;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

use httpd_metrics_collector::cli::{Args, Commands, LogLevel};
use httpd_metrics_collector::config::{
    render_config, resolve_config, validate_effective_config, Config,
};
use httpd_metrics_collector::shutdown::{shutdown_after, wait_for_signal};
use httpd_metrics_collector::{InitOptions, StatusService};

use commands::{command_scrape, command_send};

/// Build identifier reported at startup.
const BUILD: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// Picks the log level: CLI flag, then --debug, then config file, then info.
fn effective_log_level(config: &Config, args: &Args) -> LogLevel {
    if let Some(level) = &args.log_level {
        return level.clone();
    }
    if args.debug {
        return LogLevel::Debug;
    }
    config
        .log_level
        .as_deref()
        .and_then(|s| LogLevel::from_str(s, true).ok())
        .unwrap_or(LogLevel::Info)
}

fn level_filter(level: &LogLevel) -> LevelFilter {
    match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(config: &Config, args: &Args) {
    let level = effective_log_level(config, args);
    let max_level = level_filter(&level);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", level);
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if let Err(e) = validate_effective_config(&config) {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
        if args.check_config {
            println!("✅ Configuration is valid");
        } else {
            println!("{}", render_config(&config, args.config_format)?);
        }
        return Ok(());
    }

    // Client subcommands talk to an already running collector
    if let Some(command) = &args.command {
        setup_logging(&Config::default(), &args);
        let result = match command {
            Commands::Send { socket, lines } => command_send(socket, lines).await,
            Commands::Scrape { socket } => command_scrape(socket).await,
        };
        if let Err(e) = result {
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    let config = resolve_config(&args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&config, &args);

    let opts = InitOptions::from_config(&config).map_err(|e| {
        error!("failed to initialize metrics: {}", e);
        e
    })?;
    let service = StatusService::from_config(&config);
    let socket = service.initialize(&opts).await.map_err(|e| {
        error!("{}", e);
        e
    })?;

    info!(
        "httpd-metrics-collector v{} initialized - socket:{} - uid:{} - gid:{} - build:{}",
        env!("CARGO_PKG_VERSION"),
        socket.display(),
        opts.owner.uid,
        opts.owner.gid,
        BUILD
    );

    let signal = wait_for_signal().await?;
    shutdown_after(&service, signal, config.reload_grace()).await;

    info!("httpd-metrics-collector stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_off_disables_everything() {
        assert_eq!(level_filter(&LogLevel::Off), LevelFilter::OFF);
        assert_eq!(level_filter(&LogLevel::Error), LevelFilter::ERROR);
        assert_eq!(level_filter(&LogLevel::Trace), LevelFilter::TRACE);
    }

    #[test]
    fn test_cli_level_beats_debug_switch_and_config() {
        let args = Args::parse_from(["httpd-metrics-collector", "--log-level", "off", "--debug"]);
        let level = effective_log_level(&Config::default(), &args);
        assert_eq!(level_filter(&level), LevelFilter::OFF);

        let args = Args::parse_from(["httpd-metrics-collector", "--debug"]);
        let level = effective_log_level(&Config::default(), &args);
        assert_eq!(level_filter(&level), LevelFilter::DEBUG);
    }
}
