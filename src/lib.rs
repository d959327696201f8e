//! # cappedlog
//!
//! A fixed-capacity, self-overwriting block log stored in a single file.
//!
//! ## Features
//!
//! - **Bounded Disk Usage**: The file never grows past its configured size
//! - **Stable Ids**: Every block gets an ever-increasing id usable as a pointer
//! - **Overwrite Detection**: Reads of overwritten blocks report expiry instead of garbage
//! - **Online Resize**: Grow or shrink without losing the most recent blocks
//! - **Compression**: Per-block LZ4/Snappy compression
//! - **Write Statistics**: Per-payload-type counters with Prometheus output
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cappedlog::{CappedLog, Options};
//!
//! let log = CappedLog::open_with_options("./traces.capped", Options::default())?;
//!
//! let id = log.write(b"trace payload", "trace")?.expect("log is open");
//! assert_eq!(log.read(id)?.as_deref(), Some(&b"trace payload"[..]));
//!
//! // Shrinking keeps only the newest blocks.
//! log.resize(1024)?;
//! if log.is_expired(id) {
//!     println!("overwritten");
//! }
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod types;

// Log facade
mod capped_log;

// Internal modules
mod allocator;
mod codec;
mod metrics;
mod reader;
mod resize;
mod util;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Compression, Options, OptionsBuilder, SyncMode};
pub use types::{CappedId, ReadOutcome};

// Log
pub use capped_log::CappedLog;
pub use resize::ResizeKind;

// On-disk layout
pub use allocator::{BLOCK_HEADER_SIZE, HEADER_SKIP_BYTES};

// Codecs
pub use codec::{BlockCodec, Lz4Codec, NoCompression, SnappyCodec};

// Metrics
pub use metrics::{CappedLogStats, Counter, Histogram};
