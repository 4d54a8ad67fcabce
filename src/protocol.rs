//! Line protocol spoken by the worker processes.
//!
//! ```text
//! metrics:                              -> full exposition snapshot, then close
//! server:<name>;<value>[;<label>...]    -> server level update
//! request:<name>;<value>[;<label>...]   -> request level update
//! <empty line>                          -> close
//! ```
//!
//! Updates are best effort: an unparseable value counts as zero, and a
//! rejected update is logged and dropped without telling the client.

use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::metrics::{Scope, StatusMetrics};

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command<'a> {
    /// Render the registry and close the connection.
    Metrics,
    /// Apply an update and keep reading.
    Update(Scope, &'a str),
    /// Client is done.
    End,
}

impl<'a> Command<'a> {
    /// Parses a line with its line terminator already stripped or not.
    pub fn parse(line: &'a str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::End);
        }
        let (verb, payload) = line.split_once(':').unwrap_or((line, ""));
        match verb {
            "metrics" => Ok(Command::Metrics),
            "server" => Ok(Command::Update(Scope::Server, payload)),
            "request" => Ok(Command::Update(Scope::Request, payload)),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

/// A decoded update payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub name: String,
    pub value: f64,
    pub labels: Vec<String>,
}

impl Update {
    /// Splits `<name>;<value>[;<label>...]`. A missing or malformed value is 0.
    pub fn parse(payload: &str) -> Self {
        let mut parts = payload.split(';');
        let name = parts.next().unwrap_or_default().to_string();
        let value = parts
            .next()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        let labels = parts.map(str::to_string).collect();
        Self {
            name,
            value,
            labels,
        }
    }
}

/// Trims or right-pads `labels` with empty strings to exactly `count` entries.
pub fn reconcile_labels(mut labels: Vec<String>, count: usize) -> Vec<String> {
    labels.resize(count, String::new());
    labels
}

/// Parses an update payload and applies it to the registry.
///
/// Request updates have their labels reconciled to the registry's request
/// label count first. Failures are logged and dropped.
pub fn apply_update(metrics: &StatusMetrics, scope: Scope, payload: &str) {
    let mut update = Update::parse(payload);
    if scope == Scope::Request {
        update.labels = reconcile_labels(update.labels, metrics.label_count());
    }

    match metrics.apply(&update.name, update.value, &update.labels) {
        Ok(()) => debug!(
            "applied {:?} update {}={} {:?}",
            scope, update.name, update.value, update.labels
        ),
        Err(e) => warn!("dropping update '{}': {}", payload, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Collector, MetricSchema, ServerInfo};

    fn metrics(labels: &[&str]) -> StatusMetrics {
        StatusMetrics::new(&MetricSchema {
            server: ServerInfo::default(),
            request_label_names: labels.iter().map(|s| s.to_string()).collect(),
            time_buckets: vec![0.1, 1.0],
            size_buckets: vec![100.0, 1000.0],
        })
        .unwrap()
    }

    fn requests_total(metrics: &StatusMetrics, labels: &[&str]) -> f64 {
        match metrics.get("promRequests") {
            Some(Collector::CounterVec(c)) => c.get_metric_with_label_values(labels).unwrap().get(),
            _ => panic!("promRequests is not a counter vec"),
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("metrics:\n").unwrap(), Command::Metrics);
        assert_eq!(Command::parse("metrics").unwrap(), Command::Metrics);
        assert_eq!(Command::parse("\n").unwrap(), Command::End);
        assert_eq!(Command::parse("").unwrap(), Command::End);
        assert_eq!(
            Command::parse("server:promCPULoad;0.5\n").unwrap(),
            Command::Update(Scope::Server, "promCPULoad;0.5")
        );
        assert_eq!(
            Command::parse("request:promRequests;1;GET;200").unwrap(),
            Command::Update(Scope::Request, "promRequests;1;GET;200")
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(matches!(
            Command::parse("update:promRequests;1"),
            Err(ProtocolError::UnknownCommand(verb)) if verb == "update"
        ));
        assert!(Command::parse("hello").is_err());
    }

    #[test]
    fn test_update_parse() {
        let u = Update::parse("promRequests;1;GET;200");
        assert_eq!(u.name, "promRequests");
        assert_eq!(u.value, 1.0);
        assert_eq!(u.labels, vec!["GET", "200"]);
    }

    #[test]
    fn test_update_parse_coerces_bad_values_to_zero() {
        assert_eq!(Update::parse("promCPULoad;abc").value, 0.0);
        assert_eq!(Update::parse("promCPULoad").value, 0.0);
        assert_eq!(Update::parse("promCPULoad;").value, 0.0);
        assert_eq!(Update::parse("promCPULoad;0.75").value, 0.75);
    }

    #[test]
    fn test_reconcile_labels() {
        let l = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(reconcile_labels(l(&[]), 2), l(&["", ""]));
        assert_eq!(reconcile_labels(l(&["GET"]), 2), l(&["GET", ""]));
        assert_eq!(reconcile_labels(l(&["GET", "200"]), 2), l(&["GET", "200"]));
        assert_eq!(reconcile_labels(l(&["GET", "200", "x"]), 2), l(&["GET", "200"]));
        assert_eq!(
            reconcile_labels(l(&["GET", "200", "x", "y", "z"]), 2),
            l(&["GET", "200"])
        );
    }

    #[test]
    fn test_apply_request_update_pads_and_truncates() {
        let m = metrics(&["method", "status"]);
        apply_update(&m, Scope::Request, "promRequests;1;GET");
        apply_update(&m, Scope::Request, "promRequests;1;GET;200;extra");
        apply_update(&m, Scope::Request, "promRequests;1;GET;200");
        assert_eq!(requests_total(&m, &["GET", ""]), 1.0);
        assert_eq!(requests_total(&m, &["GET", "200"]), 2.0);
    }

    #[test]
    fn test_apply_server_update_keeps_labels() {
        let m = metrics(&["method"]);
        apply_update(&m, Scope::Server, "promScoreboard;4;idle");
        match m.get("promScoreboard") {
            Some(Collector::GaugeVec(g)) => {
                assert_eq!(g.get_metric_with_label_values(&["idle"]).unwrap().get(), 4.0)
            }
            _ => panic!("promScoreboard is not a gauge vec"),
        }
    }

    #[test]
    fn test_apply_unknown_metric_is_inert() {
        let m = metrics(&["method"]);
        apply_update(&m, Scope::Request, "promRequests;2;GET");
        apply_update(&m, Scope::Request, "promBogus;5;GET");
        apply_update(&m, Scope::Server, ";;");
        assert_eq!(requests_total(&m, &["GET"]), 2.0);
    }
}
