//! Process tree walk and throttled sampling.
//!
//! A sample sums resource usage over every process below the monitored root
//! whose command line names the server. Walking the tree is comparatively
//! expensive, so [`ProcSampler`] reuses the previous sample until the update
//! interval has passed.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::metrics::StatusMetrics;
use crate::process::procfs::{ProcResources, ProcessSource};

/// Aggregate resource usage across the matching processes of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcSample {
    pub total: u64,
    pub threads: u64,
    pub open_fds: u64,
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

impl ProcSample {
    fn add(&mut self, res: &ProcResources) {
        self.total += 1;
        self.threads += res.threads;
        self.open_fds += res.open_fds;
        self.rss_bytes += res.rss_bytes;
        self.vms_bytes += res.vms_bytes;
        self.read_bytes += res.read_bytes;
        self.write_bytes += res.write_bytes;
    }
}

/// The process the tree walk starts from: our parent, or ourselves when the
/// parent is init (we were re-parented or started standalone).
pub fn monitored_root_pid() -> u32 {
    let ppid = std::os::unix::process::parent_id();
    if ppid <= 1 {
        std::process::id()
    } else {
        ppid
    }
}

/// Walks the tree below `root` depth first and sums every process whose
/// command line contains one of `patterns`.
///
/// Matching is per process: children of a non-matching process are still
/// visited. Processes that vanish or cannot be read are skipped.
pub fn sample_tree(source: &dyn ProcessSource, root: u32, patterns: &[String]) -> ProcSample {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for pid in source.pids() {
        if let Some(ppid) = source.parent(pid) {
            if ppid != pid {
                children.entry(ppid).or_default().push(pid);
            }
        }
    }

    let mut sample = ProcSample::default();
    let mut visited = HashSet::new();
    let mut stack = vec![root];

    while let Some(pid) = stack.pop() {
        if !visited.insert(pid) {
            continue;
        }
        if let Some(res) = matching_resources(source, pid, patterns) {
            sample.add(&res);
        }
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().rev());
        }
    }

    sample
}

fn matching_resources(
    source: &dyn ProcessSource,
    pid: u32,
    patterns: &[String],
) -> Option<ProcResources> {
    let cmdline = source.cmdline(pid)?;
    if !patterns
        .iter()
        .any(|p| !p.is_empty() && cmdline.contains(p.as_str()))
    {
        return None;
    }
    source.resources(pid)
}

/// Throttled process tree sampler feeding the process gauges.
pub struct ProcSampler {
    source: Box<dyn ProcessSource>,
    root: u32,
    patterns: Vec<String>,
    interval: Duration,
    last_sample: Mutex<Option<Instant>>,
}

impl ProcSampler {
    pub fn new(
        source: Box<dyn ProcessSource>,
        root: u32,
        patterns: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            root,
            patterns,
            interval,
            last_sample: Mutex::new(None),
        }
    }

    /// Time of the last completed refresh, if any.
    pub fn last_sample(&self) -> Option<Instant> {
        self.last_sample.lock().ok().and_then(|guard| *guard)
    }

    /// Samples the tree and writes the gauges unless the previous sample is
    /// younger than the update interval. Returns whether a sample was taken.
    ///
    /// The timestamp is claimed before walking, so concurrent callers within
    /// the window keep serving the previous values.
    pub fn refresh_if_due(&self, metrics: &StatusMetrics) -> bool {
        {
            let Ok(mut last) = self.last_sample.lock() else {
                return false;
            };
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.interval {
                    return false;
                }
            }
            *last = Some(now);
        }

        let start = Instant::now();
        let sample = sample_tree(self.source.as_ref(), self.root, &self.patterns);
        metrics.record_proc_sample(&sample);
        debug!(
            "Process sample from root {}: {} processes, {} threads in {:.3}ms",
            self.root,
            sample.total,
            sample.threads,
            start.elapsed().as_secs_f64() * 1000.0
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory process table: pid -> (ppid, cmdline, resources).
    #[derive(Default)]
    struct FakeTable {
        procs: HashMap<u32, (u32, String, Option<ProcResources>)>,
        walks: Arc<AtomicUsize>,
    }

    impl FakeTable {
        fn with(mut self, pid: u32, ppid: u32, cmd: &str, res: Option<ProcResources>) -> Self {
            self.procs.insert(pid, (ppid, cmd.to_string(), res));
            self
        }
    }

    impl ProcessSource for FakeTable {
        fn pids(&self) -> Vec<u32> {
            self.walks.fetch_add(1, Ordering::SeqCst);
            self.procs.keys().copied().collect()
        }
        fn parent(&self, pid: u32) -> Option<u32> {
            self.procs.get(&pid).map(|p| p.0)
        }
        fn cmdline(&self, pid: u32) -> Option<String> {
            self.procs.get(&pid).map(|p| p.1.clone())
        }
        fn resources(&self, pid: u32) -> Option<ProcResources> {
            self.procs.get(&pid).and_then(|p| p.2)
        }
    }

    fn res(rss: u64, threads: u64) -> Option<ProcResources> {
        Some(ProcResources {
            rss_bytes: rss,
            vms_bytes: rss * 2,
            read_bytes: 1,
            write_bytes: 2,
            open_fds: 5,
            threads,
        })
    }

    fn patterns() -> Vec<String> {
        vec!["httpd".into(), "apache".into()]
    }

    #[test]
    fn test_sample_tree_sums_matching_processes() {
        let table = FakeTable::default()
            .with(100, 1, "/usr/sbin/httpd -k start", res(1000, 1))
            .with(101, 100, "/usr/sbin/httpd -k start", res(2000, 25))
            .with(102, 100, "/usr/sbin/httpd -k start", res(3000, 25))
            .with(200, 1, "/usr/sbin/httpd -k start", res(9999, 9));

        let sample = sample_tree(&table, 100, &patterns());
        assert_eq!(sample.total, 3);
        assert_eq!(sample.threads, 51);
        assert_eq!(sample.rss_bytes, 6000);
        assert_eq!(sample.vms_bytes, 12000);
        assert_eq!(sample.open_fds, 15);
        assert_eq!(sample.read_bytes, 3);
        assert_eq!(sample.write_bytes, 6);
    }

    #[test]
    fn test_sample_tree_descends_through_non_matching_nodes() {
        let table = FakeTable::default()
            .with(100, 1, "/usr/sbin/apache2", res(1000, 1))
            .with(101, 100, "/bin/sh -c rotatelogs", res(50, 1))
            .with(102, 101, "/usr/sbin/apache2 -k start", res(2000, 2));

        let sample = sample_tree(&table, 100, &patterns());
        assert_eq!(sample.total, 2);
        assert_eq!(sample.rss_bytes, 3000);
    }

    #[test]
    fn test_sample_tree_skips_unreadable_processes() {
        let table = FakeTable::default()
            .with(100, 1, "httpd", res(1000, 1))
            .with(101, 100, "httpd", None)
            .with(102, 101, "httpd", res(10, 1));

        let sample = sample_tree(&table, 100, &patterns());
        assert_eq!(sample.total, 2);
        assert_eq!(sample.rss_bytes, 1010);
    }

    #[test]
    fn test_sample_tree_missing_root() {
        let table = FakeTable::default();
        assert_eq!(sample_tree(&table, 4242, &patterns()), ProcSample::default());
    }

    #[test]
    fn test_sample_tree_survives_parent_cycles() {
        let table = FakeTable::default()
            .with(100, 101, "httpd", res(1, 1))
            .with(101, 100, "httpd", res(1, 1));
        assert_eq!(sample_tree(&table, 100, &patterns()).total, 2);
    }

    #[test]
    fn test_refresh_is_throttled() {
        let walks = Arc::new(AtomicUsize::new(0));
        let table = FakeTable {
            walks: walks.clone(),
            ..FakeTable::default()
        }
        .with(100, 1, "httpd", res(1, 1));
        let sampler = ProcSampler::new(Box::new(table), 100, patterns(), Duration::from_secs(60));
        let metrics = crate::metrics::StatusMetrics::new(&crate::metrics::MetricSchema {
            server: Default::default(),
            request_label_names: vec![],
            time_buckets: vec![1.0],
            size_buckets: vec![1.0],
        })
        .unwrap();

        assert!(sampler.last_sample().is_none());
        assert!(sampler.refresh_if_due(&metrics));
        assert!(!sampler.refresh_if_due(&metrics));
        assert_eq!(walks.load(Ordering::SeqCst), 1);
        assert!(sampler.last_sample().is_some());
    }

    #[test]
    fn test_refresh_after_interval() {
        let table = FakeTable::default().with(100, 1, "httpd", res(1, 1));
        let sampler = ProcSampler::new(Box::new(table), 100, patterns(), Duration::ZERO);
        let metrics = crate::metrics::StatusMetrics::new(&crate::metrics::MetricSchema {
            server: Default::default(),
            request_label_names: vec![],
            time_buckets: vec![1.0],
            size_buckets: vec![1.0],
        })
        .unwrap();

        assert!(sampler.refresh_if_due(&metrics));
        assert!(sampler.refresh_if_due(&metrics));
    }
}
