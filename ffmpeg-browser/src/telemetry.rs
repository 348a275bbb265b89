//! Memory and timing telemetry.

use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Time source used for durations and scratch-file stamps.
pub trait Clock {
    /// Monotonic time since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Wall-clock milliseconds since the Unix epoch.
    fn unix_millis(&self) -> u64;
}

/// [`Clock`] backed by `std::time`. Not usable on `wasm32-unknown-unknown`,
/// where hosts supply a clock of their own.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Memory usage in mebibytes, rounded to one decimal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Current heap length.
    pub used: f64,
    /// Initial memory the engine was built with, or the heap length once
    /// the heap has grown past it.
    pub total: f64,
}

impl MemoryUsage {
    /// Build from byte counts. `total` is never below `used`: a missing
    /// initial size, or a heap grown past it, reports the heap length.
    pub fn from_bytes(heap_bytes: usize, initial_bytes: Option<usize>) -> Self {
        let total = initial_bytes.map_or(heap_bytes, |initial| initial.max(heap_bytes));
        Self {
            used: to_mib(heap_bytes),
            total: to_mib(total),
        }
    }

    /// Fraction of total in use.
    pub fn ratio(&self) -> f64 {
        if self.total > 0.0 {
            self.used / self.total
        } else {
            0.0
        }
    }
}

fn to_mib(bytes: usize) -> f64 {
    (bytes as f64 / BYTES_PER_MIB * 10.0).round() / 10.0
}

/// Memory usage recorded at a labelled point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    /// Operation label, e.g. `start-processing`.
    pub operation: String,
    /// Milliseconds since telemetry started.
    pub timestamp_ms: f64,
    /// Usage at that point.
    pub memory: MemoryUsage,
}

/// Accumulated telemetry for one engine session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReport {
    /// Highest used value seen, in MiB.
    pub peak_memory_usage_mib: f64,
    /// Every snapshot taken, oldest first.
    pub memory_snapshots: Vec<MemorySnapshot>,
    /// Whether persistent storage is mounted.
    pub opfs_available: bool,
    /// Whether the engine is ready.
    pub initialized: bool,
}

/// Records snapshots for the lifetime of one engine.
pub struct Telemetry {
    clock: Rc<dyn Clock>,
    started: Duration,
    warning_ratio: f64,
    snapshots: Vec<MemorySnapshot>,
    peak_used: f64,
}

impl Telemetry {
    /// Start collecting.
    pub fn start(clock: Rc<dyn Clock>, warning_ratio: f64) -> Self {
        let started = clock.now();
        Self {
            clock,
            started,
            warning_ratio,
            snapshots: Vec::new(),
            peak_used: 0.0,
        }
    }

    /// Record a snapshot. Usage above the warning ratio is logged, never
    /// treated as an error.
    pub fn log_snapshot(&mut self, operation: &str, usage: MemoryUsage) {
        let timestamp_ms = self.clock.now().saturating_sub(self.started).as_secs_f64() * 1000.0;

        self.peak_used = self.peak_used.max(usage.used);
        if usage.used > usage.total * self.warning_ratio {
            tracing::warn!(
                operation,
                used_mib = usage.used,
                total_mib = usage.total,
                "High memory usage"
            );
        } else {
            tracing::trace!(operation, used_mib = usage.used, "Memory snapshot");
        }

        self.snapshots.push(MemorySnapshot {
            operation: operation.to_string(),
            timestamp_ms,
            memory: usage,
        });
    }

    /// Snapshots recorded so far.
    pub fn snapshots(&self) -> &[MemorySnapshot] {
        &self.snapshots
    }

    /// Peak used MiB across all snapshots.
    pub fn peak_used(&self) -> f64 {
        self.peak_used
    }

    /// Build a report.
    pub fn report(&self, opfs_available: bool, initialized: bool) -> TelemetryReport {
        TelemetryReport {
            peak_memory_usage_mib: self.peak_used,
            memory_snapshots: self.snapshots.clone(),
            opfs_available,
            initialized,
        }
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("snapshots", &self.snapshots.len())
            .field("peak_used", &self.peak_used)
            .finish()
    }
}
