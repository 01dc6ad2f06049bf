//! Memory watchdog for validator workers.
//!
//! Test executions run as children of the worker, so usage is measured over
//! the whole process tree rooted at the worker.

use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

/// Fraction of the limit at which the watchdog fires.
pub const DEFAULT_THRESHOLD: f64 = 0.9;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Reports current memory use in bytes.
pub trait MemoryProbe: Send + 'static {
    fn used_bytes(&self) -> Option<u64>;
}

fn parse_kib(status: &str, prefix: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        if !line.starts_with(prefix) {
            return None;
        }
        let value = line
            .split_whitespace()
            .nth(1)
            .and_then(|token| token.parse::<u64>().ok())?;
        Some(value.saturating_mul(1024))
    })
}

/// Resident set size of a process and all of its descendants, read from
/// `/proc`. Yields `None` off Linux.
#[derive(Debug, Clone, Copy)]
pub struct ProcessTreeProbe {
    root: u32,
}

impl ProcessTreeProbe {
    pub fn new(root: u32) -> Self {
        Self { root }
    }

    pub fn current() -> Self {
        Self::new(std::process::id())
    }

    fn rss(pid: u32) -> Option<u64> {
        let status = fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
        parse_kib(&status, "VmRSS:")
    }

    /// Every live descendant of the root, parents before children.
    pub fn descendants(&self) -> Vec<u32> {
        let mut found = Vec::new();
        let mut pending = Self::children(self.root);
        while let Some(pid) = pending.pop() {
            found.push(pid);
            pending.extend(Self::children(pid));
        }
        found
    }

    fn children(pid: u32) -> Vec<u32> {
        let Ok(tasks) = fs::read_dir(format!("/proc/{}/task", pid)) else {
            return Vec::new();
        };
        tasks
            .flatten()
            .filter_map(|task| fs::read_to_string(task.path().join("children")).ok())
            .flat_map(|list| {
                list.split_whitespace()
                    .filter_map(|p| p.parse::<u32>().ok())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl MemoryProbe for ProcessTreeProbe {
    fn used_bytes(&self) -> Option<u64> {
        let root = Self::rss(self.root)?;
        // Children may exit between listing and reading.
        Some(self.descendants().into_iter().fold(root, |total, pid| {
            total.saturating_add(Self::rss(pid).unwrap_or(0))
        }))
    }
}

/// Physical memory from `/proc/meminfo`, the default limit when none is
/// configured.
pub fn system_memory_bytes() -> Option<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    parse_kib(&meminfo, "MemTotal:")
}

/// Polls a probe on a background thread and fires once when usage crosses
/// `threshold * limit`.
#[derive(Debug)]
pub struct MemoryWatchdog {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MemoryWatchdog {
    pub fn start<P, F>(
        probe: P,
        limit_bytes: u64,
        threshold: f64,
        interval: Duration,
        on_exceeded: F,
    ) -> io::Result<Self>
    where
        P: MemoryProbe,
        F: FnOnce(u64) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let trigger = (limit_bytes as f64 * threshold) as u64;
        debug!(limit_bytes, trigger, "Memory watchdog armed");
        let thread = thread::Builder::new()
            .name("prf-memory-watchdog".to_string())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    if let Some(used) = probe.used_bytes() {
                        if used >= trigger {
                            warn!(used, limit_bytes, "Memory threshold exceeded");
                            on_exceeded(used);
                            return;
                        }
                    }
                    thread::sleep(interval);
                }
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop polling and wait for the thread.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MemoryWatchdog {
    fn drop(&mut self) {
        self.halt();
    }
}
