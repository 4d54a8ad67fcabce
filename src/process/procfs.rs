//! Process introspection backed by the /proc filesystem.
//!
//! The sampler only needs a handful of read-only facts per process, so they
//! sit behind the [`ProcessSource`] trait; [`ProcFs`] is the Linux
//! implementation and tests substitute an in-memory table.

use once_cell::sync::Lazy;
use std::fs;
use std::path::{Path, PathBuf};

/// Memory page size in bytes, used to convert `statm` page counts.
pub static PAGE_SIZE: Lazy<u64> = Lazy::new(get_page_size);

fn get_page_size() -> u64 {
    // SAFETY: sysconf is safe to call with _SC_PAGESIZE
    // Returns -1 on error - handled by the > 0 check
    unsafe {
        let size = libc::sysconf(libc::_SC_PAGESIZE);
        if size > 0 {
            return size as u64;
        }
    }
    4096
}

/// Resource usage of one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcResources {
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub open_fds: u64,
    pub threads: u64,
}

/// Read-only view of the OS process table.
///
/// Every method is best effort: a process that exited or cannot be read
/// yields `None` (or is simply absent from `pids`).
pub trait ProcessSource: Send + Sync {
    /// All process ids currently visible.
    fn pids(&self) -> Vec<u32>;
    /// Parent process id.
    fn parent(&self, pid: u32) -> Option<u32>;
    /// Command line with arguments joined by spaces.
    fn cmdline(&self, pid: u32) -> Option<String>;
    /// Memory, I/O, fd and thread counts.
    fn resources(&self, pid: u32) -> Option<ProcResources>;
}

/// [`ProcessSource`] reading a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn proc_path(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }
}

impl ProcessSource for ProcFs {
    fn pids(&self) -> Vec<u32> {
        let mut out = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                    out.push(pid);
                }
            }
        }
        out
    }

    fn parent(&self, pid: u32) -> Option<u32> {
        let content = fs::read_to_string(self.proc_path(pid).join("stat")).ok()?;
        parse_stat_ppid(&content)
    }

    fn cmdline(&self, pid: u32) -> Option<String> {
        let content = fs::read(self.proc_path(pid).join("cmdline")).ok()?;
        let parts: Vec<&str> = content
            .split(|&b| b == 0u8)
            .filter(|s| !s.is_empty())
            .filter_map(|s| std::str::from_utf8(s).ok())
            .collect();
        Some(parts.join(" "))
    }

    fn resources(&self, pid: u32) -> Option<ProcResources> {
        let proc_path = self.proc_path(pid);
        let (vms_bytes, rss_bytes) = read_statm(&proc_path)?;
        let (read_bytes, write_bytes) = read_io(&proc_path)?;
        let open_fds = fs::read_dir(proc_path.join("fd")).ok()?.count() as u64;
        let threads = read_threads(&proc_path)?;
        Some(ProcResources {
            rss_bytes,
            vms_bytes,
            read_bytes,
            write_bytes,
            open_fds,
            threads,
        })
    }
}

/// Extracts the parent pid (field 4) from `/proc/<pid>/stat`.
///
/// The command name in field 2 may contain spaces and parentheses, so fields
/// are counted from the last closing parenthesis.
pub fn parse_stat_ppid(content: &str) -> Option<u32> {
    let rest = &content[content.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    fields.next()?; // state
    fields.next()?.parse().ok()
}

/// Reads virtual and resident size in bytes from `/proc/<pid>/statm`.
fn read_statm(proc_path: &Path) -> Option<(u64, u64)> {
    let content = fs::read_to_string(proc_path.join("statm")).ok()?;
    let mut fields = content.split_whitespace();
    let size: u64 = fields.next()?.parse().ok()?;
    let resident: u64 = fields.next()?.parse().ok()?;
    Some((size * *PAGE_SIZE, resident * *PAGE_SIZE))
}

/// Reads storage `read_bytes`/`write_bytes` from `/proc/<pid>/io`.
fn read_io(proc_path: &Path) -> Option<(u64, u64)> {
    let content = fs::read_to_string(proc_path.join("io")).ok()?;
    let mut read = None;
    let mut write = None;
    for line in content.lines() {
        if let Some(v) = line.strip_prefix("read_bytes:") {
            read = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("write_bytes:") {
            write = v.trim().parse().ok();
        }
    }
    Some((read?, write?))
}

/// Reads the `Threads:` line from `/proc/<pid>/status`.
fn read_threads(proc_path: &Path) -> Option<u64> {
    let content = fs::read_to_string(proc_path.join("status")).ok()?;
    content
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_process(root: &Path, pid: u32, ppid: u32, cmdline: &[&str]) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(dir.join("fd")).unwrap();
        fs::write(
            dir.join("stat"),
            format!("{pid} (my proc) S {ppid} {pid} {pid} 0 -1 4194560 0 0"),
        )
        .unwrap();
        fs::write(dir.join("cmdline"), cmdline.join("\0") + "\0").unwrap();
        fs::write(dir.join("statm"), "100 25 10 1 0 50 0\n").unwrap();
        fs::write(
            dir.join("io"),
            "rchar: 1\nwchar: 2\nsyscr: 3\nsyscw: 4\nread_bytes: 4096\nwrite_bytes: 8192\ncancelled_write_bytes: 0\n",
        )
        .unwrap();
        fs::write(dir.join("status"), "Name:\thttpd\nState:\tS\nThreads:\t7\n").unwrap();
        for fd in 0..3 {
            fs::write(dir.join("fd").join(fd.to_string()), "").unwrap();
        }
    }

    #[test]
    fn test_parse_stat_ppid_handles_spaces_in_comm() {
        assert_eq!(parse_stat_ppid("42 (httpd) S 7 42 42 0"), Some(7));
        assert_eq!(parse_stat_ppid("42 (weird ) name) R 9 42 42 0"), Some(9));
        assert_eq!(parse_stat_ppid("garbage"), None);
    }

    #[test]
    fn test_procfs_reads_fake_tree() {
        let dir = tempdir().unwrap();
        write_process(dir.path(), 10, 1, &["/usr/sbin/httpd", "-DFOREGROUND"]);
        fs::create_dir_all(dir.path().join("self")).unwrap();

        let procfs = ProcFs::new(dir.path());
        assert_eq!(procfs.pids(), vec![10]);
        assert_eq!(procfs.parent(10), Some(1));
        assert_eq!(
            procfs.cmdline(10).as_deref(),
            Some("/usr/sbin/httpd -DFOREGROUND")
        );

        let res = procfs.resources(10).unwrap();
        assert_eq!(res.vms_bytes, 100 * *PAGE_SIZE);
        assert_eq!(res.rss_bytes, 25 * *PAGE_SIZE);
        assert_eq!(res.read_bytes, 4096);
        assert_eq!(res.write_bytes, 8192);
        assert_eq!(res.open_fds, 3);
        assert_eq!(res.threads, 7);
    }

    #[test]
    fn test_procfs_missing_process() {
        let dir = tempdir().unwrap();
        let procfs = ProcFs::new(dir.path());
        assert_eq!(procfs.parent(99), None);
        assert_eq!(procfs.cmdline(99), None);
        assert_eq!(procfs.resources(99), None);
    }

    #[test]
    fn test_procfs_unreadable_io_skips_resources() {
        let dir = tempdir().unwrap();
        write_process(dir.path(), 11, 1, &["httpd"]);
        fs::remove_file(dir.path().join("11").join("io")).unwrap();
        assert_eq!(ProcFs::new(dir.path()).resources(11), None);
    }
}
