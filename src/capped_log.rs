//! CappedLog - the public facade over a single capped log file.
//!
//! The facade coordinates:
//! - the codec, applied to each block payload independently
//! - the circular allocator, which places blocks and persists the header
//! - the resize manager, for online capacity changes
//! - per-type write statistics
//!
//! # Thread Safety
//!
//! A single mutex guards the allocator, its private write handle, and the
//! shared read handle. Writers hold it for one encode-free place + write +
//! commit; readers take it once per physical chunk to re-check staleness
//! and read, and decompress outside it. Share the log across threads with
//! `Arc`.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::allocator::{read_block_len, CircularAllocator, BLOCK_HEADER_SIZE};
use crate::codec::BlockCodec;
use crate::metrics::{CappedLogStats, StatsCollector};
use crate::options::Options;
use crate::reader::BlockReader;
use crate::resize::{ResizeKind, ResizeManager};
use crate::types::{CappedId, ReadOutcome};
use crate::util::coding::{decode_records, encode_records};
use crate::util::filename::{create_parent_dir, lock_file_path};
use crate::{Error, Result};

/// File handles and allocator state, present until the log is closed.
pub(crate) struct LogState {
    /// Allocator owning the private write handle.
    pub(crate) allocator: CircularAllocator,
    /// Shared handle for block reads; swapped by a rewriting resize.
    pub(crate) read_file: File,
}

/// A fixed-capacity, self-overwriting block log.
pub struct CappedLog {
    /// Log file path.
    path: PathBuf,
    /// Log options.
    options: Arc<Options>,
    /// Block payload codec.
    codec: Arc<dyn BlockCodec>,
    /// Exclusive lock over allocator and handles; `None` once closed.
    state: Mutex<Option<LogState>>,
    /// Capacity snapshot, readable without the lock.
    capacity_bytes: AtomicU64,
    /// Cursor snapshot, readable without the lock.
    cursor: AtomicU64,
    /// Whether close() has run.
    closed: AtomicBool,
    /// Per-type write statistics.
    stats: StatsCollector,
    /// Lock file handle (kept open to hold the lock).
    lock_file: Mutex<Option<File>>,
}

impl CappedLog {
    /// Open a capped log at the given path with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::open_with_options(path, Options::default())
    }

    /// Open a capped log with custom options.
    pub fn open_with_options(path: impl AsRef<Path>, options: Options) -> Result<Arc<Self>> {
        let codec = options.codec();
        Self::open_with_codec(path, options, codec)
    }

    /// Open a capped log with a caller-supplied codec.
    ///
    /// The codec must match the one the file was written with; blocks are
    /// not tagged with their codec.
    pub fn open_with_codec(
        path: impl AsRef<Path>,
        options: Options,
        codec: Arc<dyn BlockCodec>,
    ) -> Result<Arc<Self>> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();

        if options.create_if_missing {
            create_parent_dir(&path)?;
        }

        let lock_file = if options.lock_file {
            Some(Self::acquire_lock(&path)?)
        } else {
            None
        };

        let mut allocator = CircularAllocator::open(
            &path,
            options.size_kb,
            options.sync_mode,
            options.create_if_missing,
        )?;

        if options.resize_on_open && allocator.size_kb() != options.size_kb {
            let from_kb = allocator.size_kb();
            let kind = ResizeManager::new(&mut allocator).resize(options.size_kb)?;
            info!(from_kb, to_kb = options.size_kb, ?kind, "resized capped log on open");
        }

        let read_file = File::open(&path)?;

        Ok(Arc::new(Self {
            capacity_bytes: AtomicU64::new(allocator.capacity_bytes()),
            cursor: AtomicU64::new(allocator.current_cursor()),
            path,
            options: Arc::new(options),
            codec,
            state: Mutex::new(Some(LogState {
                allocator,
                read_file,
            })),
            closed: AtomicBool::new(false),
            stats: StatsCollector::new(),
            lock_file: Mutex::new(lock_file),
        }))
    }

    /// Acquire the lock file next to the log.
    fn acquire_lock(log_path: &Path) -> Result<File> {
        let lock_path = lock_file_path(log_path);

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| {
                Error::LockError(format!(
                    "Failed to open lock file {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                return Err(Error::LockError(format!(
                    "{} is already locked by another handle",
                    log_path.display()
                )));
            }
        }

        #[allow(unused_mut)]
        let mut lock_file = lock_file;
        writeln!(lock_file, "cappedlog lock pid {}", std::process::id()).ok();

        Ok(lock_file)
    }

    /// Compress and durably store one payload.
    ///
    /// Returns `Ok(None)` if the log has been closed: the payload was not
    /// stored, and this is not an error.
    pub fn write(&self, payload: &[u8], payload_type: &str) -> Result<Option<CappedId>> {
        self.write_block(Instant::now(), payload, payload.len() as u64, payload_type)
    }

    /// Store several records in one block, read back with [`read_many`](Self::read_many).
    pub fn write_many<T: AsRef<[u8]>>(
        &self,
        payloads: &[T],
        payload_type: &str,
    ) -> Result<Option<CappedId>> {
        let start = Instant::now();
        let framed = encode_records(payloads);
        let record_bytes = payloads.iter().map(|p| p.as_ref().len() as u64).sum();
        self.write_block(start, &framed, record_bytes, payload_type)
    }

    /// Encode and append `block`, crediting `payload_bytes` to the stats.
    fn write_block(
        &self,
        start: Instant,
        block: &[u8],
        payload_bytes: u64,
        payload_type: &str,
    ) -> Result<Option<CappedId>> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }

        let encoded = self.codec.encode(block)?;
        let Some(id) = self.append_block(&encoded)? else {
            return Ok(None);
        };

        self.stats.record(
            payload_type,
            payload_bytes,
            encoded.len() as u64,
            start.elapsed(),
        );
        Ok(Some(id))
    }

    fn append_block(&self, encoded: &[u8]) -> Result<Option<CappedId>> {
        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else {
            debug!("dropping write to closed capped log");
            return Ok(None);
        };

        let mut window = state.allocator.reserve(encoded.len() as u64)?;
        window.write_all(encoded)?;
        let id = window.commit()?;

        self.publish(&state.allocator);
        Ok(Some(id))
    }

    /// Read one block.
    ///
    /// Returns `Ok(None)` if the id has expired, lies at or past the write
    /// cursor, cannot be decoded, or the log is closed. A block overwritten
    /// while streaming yields [`Error::RolledOverMidRead`].
    pub fn read(&self, id: CappedId) -> Result<Option<Bytes>> {
        match self.read_outcome(id)? {
            ReadOutcome::Found(payload) => Ok(Some(payload)),
            ReadOutcome::RolledOver => Err(Error::RolledOverMidRead { id: id.as_u64() }),
            ReadOutcome::Expired | ReadOutcome::Missing => Ok(None),
        }
    }

    /// Read one block, reporting why nothing came back.
    pub fn read_outcome(&self, id: CappedId) -> Result<ReadOutcome> {
        let raw = id.as_u64();
        let len = {
            let mut guard = self.state.lock();
            let Some(state) = guard.as_mut() else {
                return Ok(ReadOutcome::Missing);
            };

            if state.allocator.is_stale(raw) {
                debug!(id = raw, "read of expired block");
                return Ok(ReadOutcome::Expired);
            }
            let header = state.allocator.header();
            if raw >= header.curr_index {
                debug!(id = raw, cursor = header.curr_index, "read at or past the write cursor");
                return Ok(ReadOutcome::Missing);
            }

            let len = match read_block_len(&mut state.read_file, &header, raw) {
                Ok(len) => len,
                Err(e) => {
                    error!(id = raw, error = %e, "failed to read block prefix");
                    return Ok(ReadOutcome::Missing);
                }
            };
            let fits = len <= header.size_bytes() - BLOCK_HEADER_SIZE
                && raw + BLOCK_HEADER_SIZE + len <= header.curr_index;
            if !fits {
                error!(id = raw, len, "corrupt block prefix");
                return Ok(ReadOutcome::Missing);
            }
            len
        };

        let chunk_size = self.options.read_chunk_size;
        let mut reader = BufReader::with_capacity(
            chunk_size,
            BlockReader::new(&self.state, raw, len, chunk_size),
        );

        match self.codec.decode(&mut reader) {
            Ok(payload) => Ok(ReadOutcome::Found(payload)),
            Err(err) => Ok(self.classify_read_failure(id, err)),
        }
    }

    fn classify_read_failure(&self, id: CappedId, err: Error) -> ReadOutcome {
        match err {
            Error::RolledOverMidRead { .. } => {
                warn!(id = id.as_u64(), "block rolled over mid-read");
                ReadOutcome::RolledOver
            }
            Error::LogClosed => ReadOutcome::Missing,
            // Overwritten after the last chunk was read but before the decoder
            // hit the garbage: an expected race, not corruption.
            _ if self.is_expired(id) => {
                debug!(id = id.as_u64(), "block expired while decoding");
                ReadOutcome::RolledOver
            }
            err => {
                error!(
                    id = id.as_u64(),
                    codec = self.codec.name(),
                    error = %err,
                    "failed to decode block"
                );
                ReadOutcome::Missing
            }
        }
    }

    /// Read a block written with [`write_many`](Self::write_many).
    ///
    /// Any failure (expired, rolled over, undecodable, truncated batch)
    /// yields an empty vector; failures not explained by staleness are
    /// logged.
    pub fn read_many(&self, id: CappedId) -> Result<Vec<Bytes>> {
        let payload = match self.read_outcome(id)? {
            ReadOutcome::Found(payload) => payload,
            _ => return Ok(Vec::new()),
        };

        match decode_records(&payload) {
            Some(records) => Ok(records),
            None => {
                if !self.is_expired(id) {
                    error!(id = id.as_u64(), len = payload.len(), "truncated record batch");
                }
                Ok(Vec::new())
            }
        }
    }

    /// Check if an id has been overwritten or invalidated by a resize.
    ///
    /// Every id counts as expired once the log is closed.
    pub fn is_expired(&self, id: CappedId) -> bool {
        match self.state.lock().as_ref() {
            Some(state) => state.allocator.is_stale(id.as_u64()),
            None => true,
        }
    }

    /// Smallest id that is not expired; anything below it can be forgotten.
    pub fn smallest_non_expired_id(&self) -> CappedId {
        match self.state.lock().as_ref() {
            Some(state) => CappedId::new(state.allocator.smallest_valid_index()),
            None => CappedId::new(self.cursor.load(Ordering::Acquire)),
        }
    }

    /// Get the logical write cursor (the id the next block would get).
    pub fn current_cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Get the capacity of the data region in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes.load(Ordering::Acquire)
    }

    /// Get the capacity in kilobytes.
    pub fn size_kb(&self) -> u32 {
        (self.capacity_bytes() / 1024) as u32
    }

    /// Get the rebasing origin left by the most recent resize.
    pub fn last_resize_base_index(&self) -> Option<u64> {
        self.state
            .lock()
            .as_ref()
            .map(|state| state.allocator.last_resize_base_index())
    }

    /// Change the capacity.
    ///
    /// Blocks the writer for the whole operation. Resizing a closed log is a
    /// no-op.
    pub fn resize(&self, new_size_kb: u32) -> Result<ResizeKind> {
        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else {
            warn!(new_size_kb, "resize requested on a closed capped log");
            return Ok(ResizeKind::Unchanged);
        };

        let kind = ResizeManager::new(&mut state.allocator)
            .with_read_handle(&mut state.read_file)
            .resize(new_size_kb)?;

        self.publish(&state.allocator);
        Ok(kind)
    }

    /// Get write statistics for a payload type (zeroed if unknown).
    pub fn stats(&self, payload_type: &str) -> CappedLogStats {
        self.stats.get(payload_type)
    }

    /// Get every payload type written so far.
    pub fn stats_types(&self) -> Vec<String> {
        self.stats.types()
    }

    /// Format write statistics as Prometheus metrics.
    pub fn stats_to_prometheus(&self) -> String {
        self.stats.to_prometheus()
    }

    /// Close the log: sync, release handles and the lock file.
    ///
    /// Idempotent. Later writes return `Ok(None)` and reads return nothing.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let state = self.state.lock().take();
        let result = match state {
            Some(mut state) => state.allocator.sync(),
            None => Ok(()),
        };
        self.lock_file.lock().take();

        info!(path = %self.path.display(), cursor = self.current_cursor(), "closed capped log");
        result
    }

    /// Check if the log has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the options the log was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    fn publish(&self, allocator: &CircularAllocator) {
        self.cursor.store(allocator.current_cursor(), Ordering::Release);
        self.capacity_bytes
            .store(allocator.capacity_bytes(), Ordering::Release);
    }
}

impl Drop for CappedLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to close capped log");
        }
    }
}

impl std::fmt::Debug for CappedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CappedLog")
            .field("path", &self.path)
            .field("codec", &self.codec.name())
            .field("capacity_bytes", &self.capacity_bytes())
            .field("cursor", &self.current_cursor())
            .field("closed", &self.is_closed())
            .finish()
    }
}
