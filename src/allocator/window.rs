//! Write window for a reserved block.

use std::io::{self, Write};

use crate::types::CappedId;
use crate::{Error, Result};

use super::{CircularAllocator, BLOCK_HEADER_SIZE};

/// Space reserved for one block, filled through [`Write`].
///
/// Payload bytes land after the (not yet written) length prefix. Nothing
/// becomes visible to readers until [`commit`](WriteWindow::commit) writes
/// the prefix and durably advances the cursor.
pub struct WriteWindow<'a> {
    allocator: &'a mut CircularAllocator,
    /// Logical index of the block prefix.
    id: u64,
    /// Reserved payload length.
    payload_len: u64,
    /// Payload bytes written so far.
    written: u64,
}

impl<'a> WriteWindow<'a> {
    pub(super) fn new(allocator: &'a mut CircularAllocator, id: u64, payload_len: u64) -> Self {
        Self {
            allocator,
            id,
            payload_len,
            written: 0,
        }
    }

    /// Get the id the block will have once committed.
    pub fn id(&self) -> CappedId {
        CappedId::new(self.id)
    }

    /// Bytes still expected before commit.
    pub fn remaining(&self) -> u64 {
        self.payload_len - self.written
    }

    /// Write the length prefix and durably persist the new cursor.
    pub fn commit(self) -> Result<CappedId> {
        if self.written != self.payload_len {
            return Err(Error::internal(format!(
                "block {} committed with {} of {} payload bytes",
                self.id, self.written, self.payload_len
            )));
        }

        self.allocator
            .write_at(self.id, &self.payload_len.to_be_bytes())?;
        self.allocator
            .commit_cursor(self.id + BLOCK_HEADER_SIZE + self.payload_len)?;

        Ok(CappedId::new(self.id))
    }
}

impl Write for WriteWindow<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() as u64 > self.remaining() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write exceeds the reserved block length",
            ));
        }

        let logical = self.id + BLOCK_HEADER_SIZE + self.written;
        self.allocator
            .write_at(logical, buf)
            .map_err(Error::into_io)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SyncMode;
    use tempfile::tempdir;

    #[test]
    fn test_window_rejects_overflow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("window.capped");
        let mut alloc = CircularAllocator::open(&path, 1, SyncMode::None, true).unwrap();

        let mut window = alloc.reserve(4).unwrap();
        assert_eq!(window.id(), CappedId::new(0));
        assert!(window.write(b"too long").is_err());

        window.write_all(b"abcd").unwrap();
        assert_eq!(window.remaining(), 0);
        assert_eq!(window.commit().unwrap(), CappedId::new(0));
        assert_eq!(alloc.current_cursor(), 12);
    }

    #[test]
    fn test_partial_commit_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("window.capped");
        let mut alloc = CircularAllocator::open(&path, 1, SyncMode::None, true).unwrap();

        let mut window = alloc.reserve(10).unwrap();
        window.write_all(b"abc").unwrap();
        assert!(window.commit().is_err());
        assert_eq!(alloc.current_cursor(), 0);
    }
}
