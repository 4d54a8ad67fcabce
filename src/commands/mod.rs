//! CLI command implementations for httpd-metrics-collector.
//!
//! This module provides implementations for the client subcommands:
//! - `send`: push update lines into a running collector
//! - `scrape`: print the current metrics of a running collector

pub mod scrape;
pub mod send;

// Re-export command functions
pub use scrape::command_scrape;
pub use send::command_send;
