//! Prometheus metric registry for the collector.
//!
//! Every metric the workers may report is registered once, up front, under the
//! protocol key the workers use (`promRequests`, `promWorkers`, ...). The key
//! maps to a [`Collector`], a closed set of collector kinds, so applying an
//! update is one exhaustive match instead of runtime type inspection.

use ahash::AHashMap as HashMap;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
};
use tracing::debug;

use crate::config::parse_bucket_list;
use crate::error::{RegistryError, UpdateError};
use crate::process::ProcSample;

/// Namespace prefixed to every exported metric name.
pub const NAMESPACE: &str = "apache";

/// One registered metric, tagged by kind.
#[derive(Clone)]
pub enum Collector {
    /// Unlabelled counter. None of the built-in metrics use it.
    Counter(Counter),
    Gauge(Gauge),
    CounterVec(CounterVec),
    GaugeVec(GaugeVec),
    HistogramVec(HistogramVec),
}

/// Which label policy an update follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Server level metrics; labels are used as given.
    Server,
    /// Request level metrics; labels are reconciled to the request label schema.
    Request,
}

/// Static description of the server, passed in by the embedding host.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub description: String,
    pub host_name: String,
    pub mpm_name: String,
    pub concurrency_model: String,
}

/// Everything needed to build the registry.
#[derive(Debug, Clone)]
pub struct MetricSchema {
    pub server: ServerInfo,
    pub request_label_names: Vec<String>,
    pub time_buckets: Vec<f64>,
    pub size_buckets: Vec<f64>,
}

impl MetricSchema {
    /// Builds a schema from the `;`-joined bucket lists the host hands over.
    pub fn from_lists(
        server: ServerInfo,
        request_label_names: Vec<String>,
        time_buckets: &str,
        size_buckets: &str,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            server,
            request_label_names,
            time_buckets: parse_bucket_list(time_buckets)?,
            size_buckets: parse_bucket_list(size_buckets)?,
        })
    }
}

/// The registry plus the protocol-key lookup table.
///
/// The table is filled during construction and never changes afterwards, so
/// reads need no lock; each collector does its own atomic aggregation.
pub struct StatusMetrics {
    registry: Registry,
    collectors: HashMap<&'static str, Collector>,
    request_label_names: Vec<String>,
}

impl StatusMetrics {
    /// Creates and registers all metrics.
    pub fn new(schema: &MetricSchema) -> Result<Self, RegistryError> {
        let mut metrics = Self {
            registry: Registry::new(),
            collectors: HashMap::new(),
            request_label_names: schema.request_label_names.clone(),
        };
        let request_labels: Vec<&str> = schema
            .request_label_names
            .iter()
            .map(String::as_str)
            .collect();

        // ========== Server Metrics ==========
        let server_info = CounterVec::new(
            opts("server_info", "information about the apache version"),
            &["server_description", "mpm", "concurrency"],
        )?;
        server_info
            .get_metric_with_label_values(&[
                schema.server.description.as_str(),
                schema.server.mpm_name.as_str(),
                schema.server.concurrency_model.as_str(),
            ])?
            .inc();
        metrics.add("promServerInfo", Collector::CounterVec(server_info))?;

        let server_name = CounterVec::new(
            opts("server_name", "contains the server name"),
            &["server_name"],
        )?;
        server_name
            .get_metric_with_label_values(&[schema.server.host_name.as_str()])?
            .inc();
        metrics.add("promServerName", Collector::CounterVec(server_name))?;

        metrics.add_gauge("promServerUptime", "server_uptime_seconds", "server uptime in seconds")?;
        metrics.add_gauge("promCPULoad", "cpu_load", "CPU Load 1")?;
        metrics.add_gauge(
            "promMPMGeneration",
            "server_mpm_generation",
            "current mpm generation",
        )?;
        metrics.add_gauge(
            "promConfigGeneration",
            "server_config_generation",
            "current config generation",
        )?;

        let workers = GaugeVec::new(
            opts("workers", "is the total number of apache workers"),
            &["state"],
        )?;
        workers.get_metric_with_label_values(&["ready"])?.set(0.0);
        workers.get_metric_with_label_values(&["busy"])?.set(0.0);
        metrics.add("promWorkers", Collector::GaugeVec(workers))?;

        let scoreboard = GaugeVec::new(
            opts(
                "workers_scoreboard",
                "is the total number of workers from the scoreboard",
            ),
            &["state"],
        )?;
        metrics.add("promScoreboard", Collector::GaugeVec(scoreboard))?;

        // ========== Process Metrics ==========
        metrics.add_gauge("promProcCounter", "process_counter", "number of apache processes")?;
        metrics.add_gauge(
            "promThreads",
            "process_total_threads",
            "total number of threads over all apache processes",
        )?;
        metrics.add_gauge(
            "promMemoryReal",
            "process_total_rss_memory_bytes",
            "total rss bytes over all apache processes",
        )?;
        metrics.add_gauge(
            "promMemoryVirt",
            "process_total_virt_memory_bytes",
            "total virt bytes over all apache processes",
        )?;
        metrics.add_gauge(
            "promReadBytes",
            "process_total_io_read_bytes",
            "total read bytes over all apache processes",
        )?;
        metrics.add_gauge(
            "promWriteBytes",
            "process_total_io_write_bytes",
            "total write bytes over all apache processes",
        )?;
        metrics.add_gauge(
            "promOpenFD",
            "process_total_open_fd",
            "total open file handles over all apache processes",
        )?;

        // ========== Request Metrics ==========
        let requests = CounterVec::new(
            opts("requests_total", "is the total number of http requests"),
            &request_labels,
        )?;
        metrics.add("promRequests", Collector::CounterVec(requests))?;

        let response_time = HistogramVec::new(
            HistogramOpts::new("response_time_seconds", "response time histogram")
                .namespace(NAMESPACE)
                .buckets(schema.time_buckets.clone()),
            &request_labels,
        )?;
        metrics.add("promResponseTime", Collector::HistogramVec(response_time))?;

        let response_size = HistogramVec::new(
            HistogramOpts::new("response_size_bytes", "response size histogram")
                .namespace(NAMESPACE)
                .buckets(schema.size_buckets.clone()),
            &request_labels,
        )?;
        metrics.add("promResponseSize", Collector::HistogramVec(response_size))?;

        debug!(
            "Registered {} metrics with {} request labels",
            metrics.collectors.len(),
            metrics.label_count()
        );
        Ok(metrics)
    }

    fn add_gauge(
        &mut self,
        key: &'static str,
        name: &str,
        help: &str,
    ) -> Result<(), RegistryError> {
        let gauge = Gauge::with_opts(opts(name, help))?;
        self.add(key, Collector::Gauge(gauge))
    }

    fn add(&mut self, key: &'static str, collector: Collector) -> Result<(), RegistryError> {
        if self.collectors.contains_key(key) {
            return Err(RegistryError::DuplicateRegistration(key.to_string()));
        }
        let boxed: Box<dyn prometheus::core::Collector> = match &collector {
            Collector::Counter(c) => Box::new(c.clone()),
            Collector::Gauge(c) => Box::new(c.clone()),
            Collector::CounterVec(c) => Box::new(c.clone()),
            Collector::GaugeVec(c) => Box::new(c.clone()),
            Collector::HistogramVec(c) => Box::new(c.clone()),
        };
        self.registry.register(boxed).map_err(|e| match e {
            prometheus::Error::AlreadyReg => RegistryError::DuplicateRegistration(key.to_string()),
            other => RegistryError::Prometheus(other),
        })?;
        self.collectors.insert(key, collector);
        Ok(())
    }

    /// The underlying prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of request labels every request-scoped label tuple is reconciled to.
    pub fn label_count(&self) -> usize {
        self.request_label_names.len()
    }

    pub fn request_label_names(&self) -> &[String] {
        &self.request_label_names
    }

    pub fn get(&self, key: &str) -> Option<&Collector> {
        self.collectors.get(key)
    }

    /// Applies one update. Counters and histograms accumulate, gauges take the
    /// last written value.
    pub fn apply(&self, key: &str, value: f64, labels: &[String]) -> Result<(), UpdateError> {
        let collector = self
            .collectors
            .get(key)
            .ok_or_else(|| UpdateError::UnknownMetric(key.to_string()))?;

        let label_values: Vec<&str> = labels.iter().map(String::as_str).collect();
        let mismatch = |source| UpdateError::LabelMismatch {
            name: key.to_string(),
            labels: labels.to_vec(),
            source,
        };

        match collector {
            Collector::Counter(c) => {
                check_increment(key, value)?;
                c.inc_by(value);
            }
            Collector::Gauge(g) => g.set(value),
            Collector::CounterVec(c) => {
                check_increment(key, value)?;
                c.get_metric_with_label_values(&label_values)
                    .map_err(mismatch)?
                    .inc_by(value);
            }
            Collector::GaugeVec(g) => g
                .get_metric_with_label_values(&label_values)
                .map_err(mismatch)?
                .set(value),
            Collector::HistogramVec(h) => h
                .get_metric_with_label_values(&label_values)
                .map_err(mismatch)?
                .observe(value),
        }
        Ok(())
    }

    /// Writes a process tree sample into the process gauges.
    pub fn record_proc_sample(&self, sample: &ProcSample) {
        let values = [
            ("promProcCounter", sample.total as f64),
            ("promThreads", sample.threads as f64),
            ("promOpenFD", sample.open_fds as f64),
            ("promMemoryReal", sample.rss_bytes as f64),
            ("promMemoryVirt", sample.vms_bytes as f64),
            ("promReadBytes", sample.read_bytes as f64),
            ("promWriteBytes", sample.write_bytes as f64),
        ];
        for (key, value) in values {
            if let Some(Collector::Gauge(g)) = self.collectors.get(key) {
                g.set(value);
            }
        }
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

/// Counters only move up; negative or non-finite increments are rejected.
fn check_increment(key: &str, value: f64) -> Result<(), UpdateError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(UpdateError::InvalidIncrement {
            name: key.to_string(),
            value,
        })
    }
}
