//! Per-payload-type write statistics.
//!
//! Purely observational: nothing in the write or read path depends on
//! these numbers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::collector::{Counter, Histogram};

/// Snapshot of the write statistics for one payload type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CappedLogStats {
    /// Payload bytes handed to `write`, before compression.
    pub bytes_before: u64,
    /// Bytes stored after compression (excluding block prefixes).
    pub bytes_after: u64,
    /// Total time spent in `write`, in nanoseconds.
    pub total_latency_nanos: u64,
    /// Number of blocks written.
    pub write_count: u64,
    /// Fastest single write, in nanoseconds (0 before the first write).
    pub min_latency_nanos: u64,
    /// Slowest single write, in nanoseconds.
    pub max_latency_nanos: u64,
}

impl CappedLogStats {
    /// Ratio of stored bytes to payload bytes (1.0 when nothing was written).
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_before == 0 {
            1.0
        } else {
            self.bytes_after as f64 / self.bytes_before as f64
        }
    }

    /// Mean write latency.
    pub fn mean_latency(&self) -> Duration {
        if self.write_count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_latency_nanos / self.write_count)
        }
    }
}

impl fmt::Display for CappedLogStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} writes, {} -> {} ({:.1}%), mean {:.2} µs, max {:.2} µs",
            self.write_count,
            format_bytes(self.bytes_before),
            format_bytes(self.bytes_after),
            self.compression_ratio() * 100.0,
            self.mean_latency().as_nanos() as f64 / 1000.0,
            self.max_latency_nanos as f64 / 1000.0
        )
    }
}

/// Live counters for one payload type.
#[derive(Debug, Default)]
struct TypeStats {
    bytes_before: Counter,
    bytes_after: Counter,
    total_latency_nanos: Counter,
    write_count: Counter,
    latency: Histogram,
}

impl TypeStats {
    fn snapshot(&self) -> CappedLogStats {
        let (fastest, slowest) = self.latency.extremes().unwrap_or_default();
        CappedLogStats {
            bytes_before: self.bytes_before.get(),
            bytes_after: self.bytes_after.get(),
            total_latency_nanos: self.total_latency_nanos.get(),
            write_count: self.write_count.get(),
            min_latency_nanos: fastest.as_nanos() as u64,
            max_latency_nanos: slowest.as_nanos() as u64,
        }
    }
}

/// Write statistics keyed by payload type.
#[derive(Debug, Default)]
pub struct StatsCollector {
    types: RwLock<HashMap<String, Arc<TypeStats>>>,
}

impl StatsCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed block write.
    pub fn record(&self, payload_type: &str, bytes_before: u64, bytes_after: u64, elapsed: Duration) {
        let stats = self.entry(payload_type);
        stats.bytes_before.add(bytes_before);
        stats.bytes_after.add(bytes_after);
        stats.total_latency_nanos.add(elapsed.as_nanos() as u64);
        stats.write_count.inc();
        stats.latency.observe(elapsed);
    }

    /// Get stats for a payload type (zeroed for unknown types).
    pub fn get(&self, payload_type: &str) -> CappedLogStats {
        self.types
            .read()
            .get(payload_type)
            .map(|stats| stats.snapshot())
            .unwrap_or_default()
    }

    /// Get all payload types seen so far, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.types.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Format every payload type as Prometheus metrics.
    pub fn to_prometheus(&self) -> String {
        let snapshot: Vec<(String, Arc<TypeStats>)> = {
            let types = self.types.read();
            let mut entries: Vec<_> = types
                .iter()
                .map(|(name, stats)| (name.clone(), Arc::clone(stats)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        };

        let mut output = String::new();
        let counters: [(&str, &str, fn(&CappedLogStats) -> u64); 4] = [
            (
                "cappedlog_bytes_before_total",
                "Payload bytes before compression",
                |s| s.bytes_before,
            ),
            (
                "cappedlog_bytes_after_total",
                "Stored bytes after compression",
                |s| s.bytes_after,
            ),
            (
                "cappedlog_write_latency_nanos_total",
                "Total write latency in nanoseconds",
                |s| s.total_latency_nanos,
            ),
            ("cappedlog_writes_total", "Blocks written", |s| s.write_count),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            for (payload_type, stats) in &snapshot {
                output.push_str(&format!(
                    "{}{{type=\"{}\"}} {}\n",
                    name,
                    payload_type,
                    value(&stats.snapshot())
                ));
            }
            output.push('\n');
        }

        output.push_str("# HELP cappedlog_write_latency_seconds Write latency\n");
        output.push_str("# TYPE cappedlog_write_latency_seconds histogram\n");
        for (payload_type, stats) in &snapshot {
            let labels = format!("type=\"{}\"", payload_type);
            stats
                .latency
                .write_prometheus(&mut output, "cappedlog_write_latency_seconds", &labels);
        }

        output
    }

    fn entry(&self, payload_type: &str) -> Arc<TypeStats> {
        if let Some(stats) = self.types.read().get(payload_type) {
            return Arc::clone(stats);
        }
        let mut types = self.types.write();
        Arc::clone(types.entry(payload_type.to_string()).or_default())
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
