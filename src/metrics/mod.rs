//! Write statistics for the capped log.
//!
//! - **Primitives**: atomic counters and latency histograms
//! - **Per-type stats**: bytes before/after compression, latency, count
//! - **Prometheus export**: text exposition of every payload type

mod collector;
mod stats;

pub use collector::{Counter, Histogram};
pub use stats::{CappedLogStats, StatsCollector};
