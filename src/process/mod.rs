//! Process tree sampling for the server's resource gauges.
//!
//! This module provides:
//! - `procfs`: reading process tables and per-process resources from /proc
//! - `sampler`: the depth-first tree walk and the throttled sampler

pub mod procfs;
pub mod sampler;

// Re-export commonly used types
pub use procfs::{ProcFs, ProcResources, ProcessSource};
pub use sampler::{monitored_root_pid, sample_tree, ProcSample, ProcSampler};
