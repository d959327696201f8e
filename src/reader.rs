//! Streaming reader over one stored block.

use std::io::{self, Read};

use parking_lot::Mutex;

use crate::allocator::{read_contiguous, BLOCK_HEADER_SIZE};
use crate::capped_log::LogState;
use crate::Error;

/// Reads the compressed payload of one block, chunk by chunk.
///
/// Every chunk takes the log lock, re-checks that the block is still live,
/// and reads from the shared read handle at the block's current physical
/// offset. Decoding happens in the caller, outside the lock. When the
/// writer has overwritten the block the read fails with
/// [`Error::RolledOverMidRead`] carried inside the `io::Error`.
pub(crate) struct BlockReader<'a> {
    state: &'a Mutex<Option<LogState>>,
    /// Block id (logical index of the prefix).
    id: u64,
    /// Payload length from the prefix.
    len: u64,
    /// Payload bytes consumed so far.
    pos: u64,
    /// Maximum bytes per locked read.
    chunk_size: usize,
}

impl<'a> BlockReader<'a> {
    pub fn new(state: &'a Mutex<Option<LogState>>, id: u64, len: u64, chunk_size: usize) -> Self {
        Self {
            state,
            id,
            len,
            pos: 0,
            chunk_size,
        }
    }
}

impl Read for BlockReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }

        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(|| Error::LogClosed.into_io())?;
        if state.allocator.is_stale(self.id) {
            return Err(Error::RolledOverMidRead { id: self.id }.into_io());
        }

        let want = (self.len - self.pos).min(self.chunk_size as u64) as usize;
        let want = want.min(buf.len());
        let header = state.allocator.header();
        let logical = self.id + BLOCK_HEADER_SIZE + self.pos;
        let n = read_contiguous(&mut state.read_file, &header, logical, &mut buf[..want])?;

        self.pos += n as u64;
        Ok(n)
    }
}
