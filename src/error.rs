//! Error types for cappedlog.
//!
//! Staleness and a closed log are not errors: reads report them through
//! [`ReadOutcome`](crate::ReadOutcome) or an empty result, and writes to a
//! closed log return `Ok(None)`.

use std::io;
use thiserror::Error;

/// Result type alias for cappedlog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for capped log operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Log file not found and `create_if_missing` is off.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock error.
    #[error("Lock error: {0}")]
    LockError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid file format or header contents.
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    /// A single block (prefix + compressed payload) exceeds the log capacity.
    #[error("Block too large: {size} bytes (capacity: {capacity})")]
    BlockTooLarge { size: u64, capacity: u64 },

    /// The block was overwritten by the writer while it was being streamed.
    #[error("Block {id} rolled over mid-read")]
    RolledOverMidRead { id: u64 },

    /// The log was closed underneath an in-flight operation.
    #[error("Capped log is closed")]
    LogClosed,

    /// File swap during a hard resize failed.
    #[error("Resize failed: {0}")]
    ResizeFailed(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // Block readers tunnel our own errors through `io::Read`.
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<Error>()) {
            return inner.clone();
        }
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create an invalid format error.
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Create a resize error.
    pub fn resize<S: Into<String>>(msg: S) -> Self {
        Error::ResizeFailed(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Wrap this error so it can travel through `std::io` traits.
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::Other, self)
    }

    /// Check if this error is recoverable.
    ///
    /// A rolled-over read is the expected outcome of racing the writer;
    /// retrying against a newer id is always safe.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::RolledOverMidRead { .. } | Error::LogClosed)
    }

    /// Check if this error means the log file itself is unusable.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::InvalidFormat(_))
    }
}
