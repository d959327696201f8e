//! Core types for cappedlog.

use std::fmt;

use bytes::Bytes;

/// Handle to a block stored in a capped log.
///
/// The value is the logical byte offset of the block's length prefix,
/// counted since the log file was created. Ids only ever increase, so
/// comparing two ids orders their blocks by write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CappedId(u64);

impl CappedId {
    /// Create an id from its raw logical offset.
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    /// Get the raw logical offset.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for CappedId {
    fn from(index: u64) -> Self {
        Self(index)
    }
}

impl From<CappedId> for u64 {
    fn from(id: CappedId) -> Self {
        id.0
    }
}

impl fmt::Display for CappedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of reading a single block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The decompressed payload.
    Found(Bytes),
    /// The id was overwritten by wraparound or invalidated by a resize.
    Expired,
    /// The block was overwritten while it was being streamed.
    RolledOver,
    /// Nothing readable: the log is closed, the id is at or past the write
    /// cursor, or the stored bytes could not be decoded (already logged).
    Missing,
}

impl ReadOutcome {
    /// Get the payload if the block was found.
    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            ReadOutcome::Found(payload) => Some(payload),
            _ => None,
        }
    }

    /// Check if the block was found.
    pub fn is_found(&self) -> bool {
        matches!(self, ReadOutcome::Found(_))
    }

    /// Check if the data is gone because the writer overwrote it.
    pub fn is_expired(&self) -> bool {
        matches!(self, ReadOutcome::Expired | ReadOutcome::RolledOver)
    }
}
