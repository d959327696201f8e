//! Lock-free metric cells updated on the write path.
//!
//! Writers bump these after the log lock is released; readers of the
//! statistics only ever load.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, v: u64) {
        self.value.fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Upper bounds of the latency buckets, in nanoseconds.
///
/// Spans an in-cache write (a few microseconds) up to a slow fsync.
const LATENCY_BOUNDS_NANOS: [u64; 7] = [
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
];

/// Write latency distribution with extremes.
#[derive(Debug)]
pub struct Histogram {
    count: AtomicU64,
    sum_nanos: AtomicU64,
    fastest_nanos: AtomicU64,
    slowest_nanos: AtomicU64,
    /// One slot per bound plus the overflow slot.
    buckets: [AtomicU64; LATENCY_BOUNDS_NANOS.len() + 1],
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_nanos: AtomicU64::new(0),
            fastest_nanos: AtomicU64::new(u64::MAX),
            slowest_nanos: AtomicU64::new(0),
            buckets: Default::default(),
        }
    }

    /// Record one write.
    pub fn observe(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.fastest_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.slowest_nanos.fetch_max(nanos, Ordering::Relaxed);

        let slot = LATENCY_BOUNDS_NANOS
            .iter()
            .position(|&bound| nanos <= bound)
            .unwrap_or(LATENCY_BOUNDS_NANOS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Fastest and slowest write seen, or `None` before the first write.
    pub fn extremes(&self) -> Option<(Duration, Duration)> {
        if self.count() == 0 {
            return None;
        }
        Some((
            Duration::from_nanos(self.fastest_nanos.load(Ordering::Relaxed)),
            Duration::from_nanos(self.slowest_nanos.load(Ordering::Relaxed)),
        ))
    }

    /// Append this histogram as a Prometheus series in seconds.
    ///
    /// `labels` goes inside the braces, e.g. `type="trace"`.
    pub fn write_prometheus(&self, out: &mut String, name: &str, labels: &str) {
        let mut cumulative = 0u64;
        for (slot, &bound) in LATENCY_BOUNDS_NANOS.iter().enumerate() {
            cumulative += self.buckets[slot].load(Ordering::Relaxed);
            let le = bound as f64 / 1e9;
            let _ = writeln!(out, "{}_bucket{{{},le=\"{}\"}} {}", name, labels, le, cumulative);
        }
        cumulative += self.buckets[LATENCY_BOUNDS_NANOS.len()].load(Ordering::Relaxed);
        let _ = writeln!(out, "{}_bucket{{{},le=\"+Inf\"}} {}", name, labels, cumulative);

        let sum_secs = self.sum_nanos.load(Ordering::Relaxed) as f64 / 1e9;
        let _ = writeln!(out, "{}_sum{{{}}} {}", name, labels, sum_secs);
        let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, self.count());
    }
}
