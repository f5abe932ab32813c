//! Memory pressure signals for the chunk builder.
//!
//! The builder asks once per row whether memory is low; a `true` answer
//! makes it spill the current buffer. [`SystemMemoryMonitor`] answers from
//! the process's resident memory. The other implementations exist for
//! deterministic behavior in tests and embedded callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::{MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use rowsort_types::error::Result;

use crate::monitor::CancellationToken;

/// Answers "should the current buffer be spilled now?".
pub trait MemoryPressure: Send {
    /// Must observe `token` so a stuck caller can still be canceled.
    fn is_memory_low(&mut self, token: &CancellationToken) -> Result<bool>;

    /// Called after the builder has spilled a buffer. Cached readings
    /// taken before the spill should be dropped here.
    fn on_spill(&mut self) {}

    /// Short human-readable usage summary for logs.
    fn describe(&self) -> String {
        String::new()
    }
}

/// Compares process RSS against a fraction of a memory limit.
pub struct SystemMemoryMonitor {
    system: System,
    pid: Option<Pid>,
    limit_bytes: u64,
    threshold: f64,
    poll_interval: Duration,
    last_poll: Option<Instant>,
    last_used: u64,
    last_low: bool,
    samples: u64,
}

impl SystemMemoryMonitor {
    /// Monitor using the configured memory limit, or total system memory
    /// when none is configured.
    pub fn new(threshold: f64) -> Self {
        let mut system = System::new();
        system.refresh_memory_specifics(MemoryRefreshKind::everything());
        let configured = rowsort_config::get_memory_limit() as u64;
        let limit_bytes = if configured > 0 {
            configured
        } else {
            system.total_memory()
        };
        Self::from_parts(system, threshold, limit_bytes)
    }

    /// Monitor against an explicit limit in bytes.
    pub fn with_limit(threshold: f64, limit_bytes: u64) -> Self {
        Self::from_parts(System::new(), threshold, limit_bytes)
    }

    fn from_parts(system: System, threshold: f64, limit_bytes: u64) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("cannot determine own pid ({}), using system-wide memory", e);
                None
            }
        };
        if limit_bytes == 0 {
            tracing::warn!("could not detect a memory limit, memory pressure disabled");
        }
        SystemMemoryMonitor {
            system,
            pid,
            limit_bytes,
            threshold: threshold.clamp(f64::MIN_POSITIVE, 1.0),
            poll_interval: Duration::from_millis(
                rowsort_config::get_memory_poll_interval_ms() as u64,
            ),
            last_poll: None,
            last_used: 0,
            last_low: false,
            samples: 0,
        }
    }

    /// Minimum time between two memory samples.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    /// Memory samples taken so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Bytes in use by this process, or by the whole system when the
    /// process cannot be inspected.
    fn sample_used_bytes(&mut self) -> u64 {
        if let Some(pid) = self.pid {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory(),
            );
            if let Some(process) = self.system.process(pid) {
                return process.memory();
            }
        }
        self.system
            .refresh_memory_specifics(MemoryRefreshKind::everything());
        self.system.used_memory()
    }
}

impl MemoryPressure for SystemMemoryMonitor {
    fn is_memory_low(&mut self, token: &CancellationToken) -> Result<bool> {
        token.check()?;
        if self.limit_bytes == 0 {
            return Ok(false);
        }
        let due = self
            .last_poll
            .map_or(true, |t| t.elapsed() >= self.poll_interval);
        if due {
            self.last_used = self.sample_used_bytes();
            self.last_poll = Some(Instant::now());
            self.samples += 1;
            self.last_low = self.last_used as f64 >= self.limit_bytes as f64 * self.threshold;
        }
        Ok(self.last_low)
    }

    fn on_spill(&mut self) {
        self.last_poll = None;
    }

    fn describe(&self) -> String {
        format!(
            "{} MiB used of {} MiB limit (threshold {:.0}%)",
            self.last_used >> 20,
            self.limit_bytes >> 20,
            self.threshold * 100.0
        )
    }
}

/// Reports low memory on every `period`-th call.
#[derive(Debug, Clone)]
pub struct RowCountPressure {
    period: u64,
    calls: u64,
}

impl RowCountPressure {
    pub fn new(period: u64) -> Self {
        RowCountPressure {
            period: period.max(1),
            calls: 0,
        }
    }
}

impl MemoryPressure for RowCountPressure {
    fn is_memory_low(&mut self, token: &CancellationToken) -> Result<bool> {
        token.check()?;
        self.calls += 1;
        Ok(self.calls % self.period == 0)
    }

    fn describe(&self) -> String {
        format!("low every {} rows", self.period)
    }
}

/// Externally toggled pressure. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct ManualPressure {
    low: Arc<AtomicBool>,
}

impl ManualPressure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_low(&self, low: bool) {
        self.low.store(low, Ordering::SeqCst);
    }
}

impl MemoryPressure for ManualPressure {
    fn is_memory_low(&mut self, token: &CancellationToken) -> Result<bool> {
        token.check()?;
        Ok(self.low.load(Ordering::SeqCst))
    }
}

/// Memory is never low.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPressure;

impl MemoryPressure for NoPressure {
    fn is_memory_low(&mut self, token: &CancellationToken) -> Result<bool> {
        token.check()?;
        Ok(false)
    }
}
