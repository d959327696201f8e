//! Circular block allocator.
//!
//! The allocator owns the ever-increasing logical write cursor, the
//! capacity, and the rebasing origin left by the last resize. Logical
//! indexes map to physical offsets in the data region with
//! `(index - last_resize_base_index) % size_bytes`.
//!
//! # Format
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────┐
//! │ LogHeader (20 bytes) │ data region (size_kb * 1024 bytes, circular) │
//! └──────────────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Each block is an 8-byte big-endian length prefix followed by the
//! compressed payload. A payload may wrap across the end of the region,
//! a prefix never does: when fewer than 8 contiguous bytes remain, the
//! allocator burns them and starts the block at physical offset 0.

mod header;
mod window;

pub use header::LogHeader;
pub use window::WriteWindow;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::options::SyncMode;
use crate::{Error, Result};

/// Size of the file header; all physical offsets are relative to its end.
pub const HEADER_SKIP_BYTES: u64 = 8 + 4 + 8;

/// Size of the per-block length prefix.
pub const BLOCK_HEADER_SIZE: u64 = 8;

/// Map a logical index to its offset within the data region.
pub fn physical_offset(logical: u64, base: u64, size_bytes: u64) -> u64 {
    debug_assert!(logical >= base);
    (logical - base) % size_bytes
}

/// Read bytes starting at `logical`, stopping at the physical end of the
/// region. Returns the number of bytes read (never more than `buf.len()`).
pub(crate) fn read_contiguous(
    file: &mut File,
    header: &LogHeader,
    logical: u64,
    buf: &mut [u8],
) -> io::Result<usize> {
    let size = header.size_bytes();
    let physical = physical_offset(logical, header.last_resize_base_index, size);
    let n = (size - physical).min(buf.len() as u64) as usize;

    file.seek(SeekFrom::Start(HEADER_SKIP_BYTES + physical))?;
    file.read_exact(&mut buf[..n])?;
    Ok(n)
}

/// Read the length prefix of the block starting at `id`.
pub(crate) fn read_block_len(file: &mut File, header: &LogHeader, id: u64) -> io::Result<u64> {
    let mut prefix = [0u8; BLOCK_HEADER_SIZE as usize];
    let n = read_contiguous(file, header, id, &mut prefix)?;
    if n < prefix.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "block prefix crosses the end of the data region",
        ));
    }
    Ok(u64::from_be_bytes(prefix))
}

/// Allocator over a single circular log file.
///
/// All methods that touch the file must be called under the owning log's
/// exclusive lock.
pub struct CircularAllocator {
    /// Path of the log file.
    path: PathBuf,
    /// Private read/write handle.
    file: File,
    /// In-memory copy of the persisted header.
    header: LogHeader,
    /// Durability mode for commits.
    sync_mode: SyncMode,
}

impl CircularAllocator {
    /// Create a new log file or load an existing one.
    ///
    /// A missing or empty file is initialised with `size_kb`; an existing
    /// header keeps its own capacity.
    pub fn open(
        path: &Path,
        size_kb: u32,
        sync_mode: SyncMode,
        create_if_missing: bool,
    ) -> Result<Self> {
        if !path.exists() && !create_if_missing {
            return Err(Error::NotFound(format!(
                "Capped log does not exist: {}",
                path.display()
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_if_missing)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let header = if len == 0 {
            let header = LogHeader::new(size_kb);
            file.set_len(HEADER_SKIP_BYTES + header.size_bytes())?;
            header.write_to(&mut file)?;
            file.sync_all()?;
            info!(path = %path.display(), size_kb, "created capped log");
            header
        } else if len < HEADER_SKIP_BYTES {
            return Err(Error::invalid_format(format!(
                "{} is {} bytes, shorter than the header",
                path.display(),
                len
            )));
        } else {
            let header = LogHeader::read_from(&mut file)?;
            let expected = HEADER_SKIP_BYTES + header.size_bytes();
            if len < expected {
                // A crash between a header update and set_len.
                file.set_len(expected)?;
            }
            info!(
                path = %path.display(),
                size_kb = header.size_kb,
                curr_index = header.curr_index,
                "opened capped log"
            );
            header
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            sync_mode,
        })
    }

    /// Get the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a copy of the current header.
    pub fn header(&self) -> LogHeader {
        self.header
    }

    /// Get the logical write cursor.
    pub fn current_cursor(&self) -> u64 {
        self.header.curr_index
    }

    /// Get the capacity of the data region in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.header.size_bytes()
    }

    /// Get the capacity in kilobytes.
    pub fn size_kb(&self) -> u32 {
        self.header.size_kb
    }

    /// Get the rebasing origin.
    pub fn last_resize_base_index(&self) -> u64 {
        self.header.last_resize_base_index
    }

    /// Smallest id that has not been overwritten or invalidated.
    pub fn smallest_valid_index(&self) -> u64 {
        let wrapped = self
            .header
            .curr_index
            .saturating_sub(self.header.size_bytes());
        wrapped.max(self.header.last_resize_base_index)
    }

    /// Check if a block id points into overwritten territory.
    pub fn is_stale(&self, id: u64) -> bool {
        id < self.smallest_valid_index()
    }

    /// Map a logical index to its offset within the data region.
    pub fn to_physical_offset(&self, logical: u64) -> u64 {
        physical_offset(
            logical,
            self.header.last_resize_base_index,
            self.header.size_bytes(),
        )
    }

    /// Reserve space for a block with a `payload_len`-byte payload.
    ///
    /// Nothing is written until the returned window is filled and committed;
    /// an oversized block fails here with the header untouched.
    pub fn reserve(&mut self, payload_len: u64) -> Result<WriteWindow<'_>> {
        let capacity = self.capacity_bytes();
        let block_len = BLOCK_HEADER_SIZE + payload_len;
        if block_len > capacity {
            return Err(Error::BlockTooLarge {
                size: block_len,
                capacity,
            });
        }

        let mut start = self.header.curr_index;
        let remaining = capacity - self.to_physical_offset(start);
        if remaining < BLOCK_HEADER_SIZE {
            debug!(skipped = remaining, "block prefix would wrap, skipping to region start");
            start += remaining;
        }

        Ok(WriteWindow::new(self, start, payload_len))
    }

    /// Write `data` at `logical`, wrapping once across the region end.
    pub(crate) fn write_at(&mut self, logical: u64, mut data: &[u8]) -> Result<()> {
        debug_assert!(data.len() as u64 <= self.capacity_bytes());
        let capacity = self.capacity_bytes();
        let mut physical = self.to_physical_offset(logical);

        while !data.is_empty() {
            let n = (capacity - physical).min(data.len() as u64) as usize;
            self.file.seek(SeekFrom::Start(HEADER_SKIP_BYTES + physical))?;
            self.file.write_all(&data[..n])?;
            data = &data[n..];
            physical = 0;
        }

        Ok(())
    }

    /// Read bytes through the private handle (used while copying for resize).
    pub(crate) fn read_contiguous(&mut self, logical: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(read_contiguous(&mut self.file, &self.header, logical, buf)?)
    }

    /// Durably advance the cursor: block bytes first, then the header.
    pub(crate) fn commit_cursor(&mut self, new_cursor: u64) -> Result<()> {
        debug_assert!(new_cursor >= self.header.curr_index);
        if self.sync_mode == SyncMode::Always {
            self.file.sync_data()?;
        }

        let mut header = self.header;
        header.curr_index = new_cursor;
        self.persist(header)
    }

    /// Change the capacity in place, without moving any data.
    pub(crate) fn set_size_kb(&mut self, size_kb: u32) -> Result<()> {
        let mut header = self.header;
        header.size_kb = size_kb;
        self.persist(header)?;
        self.file.set_len(HEADER_SKIP_BYTES + header.size_bytes())?;
        Ok(())
    }

    /// Swap in a rewritten log file and its header.
    pub(crate) fn replace_file(&mut self, file: File, header: LogHeader) {
        self.file = file;
        self.header = header;
    }

    /// Flush and sync everything to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn persist(&mut self, header: LogHeader) -> Result<()> {
        header.write_to(&mut self.file)?;
        if self.sync_mode == SyncMode::Always {
            self.file.sync_data()?;
        }
        self.header = header;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path, size_kb: u32) -> CircularAllocator {
        CircularAllocator::open(&dir.join("test.capped"), size_kb, SyncMode::None, true).unwrap()
    }

    fn append(alloc: &mut CircularAllocator, payload: &[u8]) -> u64 {
        let mut window = alloc.reserve(payload.len() as u64).unwrap();
        window.write_all(payload).unwrap();
        window.commit().unwrap().as_u64()
    }

    #[test]
    fn test_create_sizes_file() {
        let dir = tempdir().unwrap();
        let alloc = open(dir.path(), 2);

        assert_eq!(alloc.current_cursor(), 0);
        assert_eq!(alloc.capacity_bytes(), 2048);
        let len = std::fs::metadata(alloc.path()).unwrap().len();
        assert_eq!(len, HEADER_SKIP_BYTES + 2048);
    }

    #[test]
    fn test_physical_offset_mapping() {
        assert_eq!(physical_offset(0, 0, 1024), 0);
        assert_eq!(physical_offset(1500, 0, 1024), 476);
        assert_eq!(physical_offset(1500, 1000, 1024), 500);
        assert_eq!(physical_offset(3048, 1000, 1024), 0);
    }

    #[test]
    fn test_append_advances_cursor() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 1);

        let first = append(&mut alloc, &[1u8; 100]);
        let second = append(&mut alloc, &[2u8; 50]);

        assert_eq!(first, 0);
        assert_eq!(second, 108);
        assert_eq!(alloc.current_cursor(), 108 + 58);
    }

    #[test]
    fn test_staleness_after_wrap() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 1);

        let first = append(&mut alloc, &[0u8; 500]);
        let second = append(&mut alloc, &[0u8; 500]);
        assert!(!alloc.is_stale(first));

        let third = append(&mut alloc, &[0u8; 500]);
        assert!(alloc.is_stale(first));
        assert!(!alloc.is_stale(second));
        assert!(!alloc.is_stale(third));
        assert_eq!(alloc.smallest_valid_index(), alloc.current_cursor() - 1024);
    }

    #[test]
    fn test_prefix_never_wraps() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 1);

        // Leave 4 bytes before the physical end.
        append(&mut alloc, &[0u8; 1012]);
        assert_eq!(alloc.to_physical_offset(alloc.current_cursor()), 1020);

        let id = append(&mut alloc, b"wrapped");
        assert_eq!(id, 1024);
        assert_eq!(alloc.to_physical_offset(id), 0);
    }

    #[test]
    fn test_block_too_large_leaves_header() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 1);
        append(&mut alloc, b"small");
        let before = alloc.header();

        match alloc.reserve(1024 - BLOCK_HEADER_SIZE + 1) {
            Err(Error::BlockTooLarge { size, capacity }) => {
                assert_eq!(size, 1025);
                assert_eq!(capacity, 1024);
            }
            other => panic!("expected BlockTooLarge, got {:?}", other.map(|w| w.id())),
        }
        assert_eq!(alloc.header(), before);

        let mut file = File::open(alloc.path()).unwrap();
        assert_eq!(LogHeader::read_from(&mut file).unwrap(), before);
    }

    #[test]
    fn test_wrapped_payload_reads_back() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 1);
        append(&mut alloc, &[0u8; 900]);

        let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let id = append(&mut alloc, &payload);

        let header = alloc.header();
        let mut file = File::open(alloc.path()).unwrap();
        assert_eq!(read_block_len(&mut file, &header, id).unwrap(), 300);

        let mut out = vec![0u8; 300];
        let mut filled = 0;
        while filled < out.len() {
            let logical = id + BLOCK_HEADER_SIZE + filled as u64;
            filled += read_contiguous(&mut file, &header, logical, &mut out[filled..]).unwrap();
        }
        assert_eq!(out, payload);
    }

    #[test]
    fn test_reopen_restores_header() {
        let dir = tempdir().unwrap();
        let cursor = {
            let mut alloc = open(dir.path(), 1);
            append(&mut alloc, b"persist me");
            alloc.sync().unwrap();
            alloc.current_cursor()
        };

        // Requested size is ignored for an existing file.
        let alloc = open(dir.path(), 4);
        assert_eq!(alloc.current_cursor(), cursor);
        assert_eq!(alloc.size_kb(), 1);
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.capped");
        let result = CircularAllocator::open(&path, 1, SyncMode::None, false);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_open_truncated_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.capped");
        std::fs::write(&path, [0u8; 7]).unwrap();

        let result = CircularAllocator::open(&path, 1, SyncMode::None, true);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}
