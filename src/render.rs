//! Text exposition rendering for `metrics:` requests.

use prometheus::{Encoder, TextEncoder};
use tracing::error;

use crate::metrics::StatusMetrics;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Marks the end of a response on the line protocol.
pub const RESPONSE_TERMINATOR: &[u8] = b"\n\n";

/// Encodes every metric family in name order, followed by the response
/// terminator. A family that fails to encode is logged and left out; the
/// rest of the payload is still returned.
pub fn render(metrics: &StatusMetrics) -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = metrics.registry().gather();
    let mut buffer = Vec::with_capacity(BUFFER_CAP);

    for (idx, family) in families.iter().enumerate() {
        let mut chunk = Vec::new();
        match encoder.encode(std::slice::from_ref(family), &mut chunk) {
            Ok(()) => buffer.extend_from_slice(&chunk),
            Err(e) => error!("internal prometheus error encoding family #{}: {}", idx, e),
        }
    }

    buffer.extend_from_slice(RESPONSE_TERMINATOR);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricSchema, ServerInfo};

    fn metrics() -> StatusMetrics {
        StatusMetrics::new(&MetricSchema {
            server: ServerInfo {
                description: "Apache/2.4.62".into(),
                host_name: "web01".into(),
                mpm_name: "event".into(),
                concurrency_model: "threaded".into(),
            },
            request_label_names: vec!["method".into(), "status".into()],
            time_buckets: vec![0.1, 1.0],
            size_buckets: vec![100.0, 1000.0],
        })
        .unwrap()
    }

    #[test]
    fn test_render_contains_registered_families() {
        let m = metrics();
        m.apply("promRequests", 1.0, &["GET".into(), "200".into()])
            .unwrap();
        let text = String::from_utf8(render(&m)).unwrap();

        assert!(text.contains("# TYPE apache_server_info counter"));
        assert!(text.contains(
            "apache_server_info{concurrency=\"threaded\",mpm=\"event\",server_description=\"Apache/2.4.62\"} 1"
        ));
        assert!(text.contains("apache_server_name{server_name=\"web01\"} 1"));
        assert!(text.contains("apache_requests_total{method=\"GET\",status=\"200\"} 1"));
        assert!(text.contains("apache_workers{state=\"busy\"} 0"));
        assert!(text.contains("apache_process_counter 0"));
    }

    #[test]
    fn test_render_ends_with_blank_line() {
        let out = render(&metrics());
        assert!(out.ends_with(b"\n\n\n"));
    }

    #[test]
    fn test_render_orders_families_by_name() {
        let text = String::from_utf8(render(&metrics())).unwrap();
        let cpu = text.find("# HELP apache_cpu_load").unwrap();
        let workers = text.find("# HELP apache_workers ").unwrap();
        assert!(cpu < workers);
    }
}
