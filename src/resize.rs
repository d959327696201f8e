//! Online capacity changes.
//!
//! A resize either rewrites the header in place (no data moves) or copies
//! the most recent `min(old, new)` bytes into a fresh file with a new
//! rebasing origin and swaps it in. The swap order is: finish and sync the
//! temporary file, delete the live file, rename the temporary into place.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::allocator::{CircularAllocator, LogHeader, HEADER_SKIP_BYTES};
use crate::util::filename::{delete_file, resize_temp_path, sync_parent_dir};
use crate::{Error, Result};

/// Bytes copied per step during a rewrite.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// How a resize was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeKind {
    /// The requested capacity equals the current one.
    Unchanged,
    /// Header updated in place; every live id stays readable.
    InPlace,
    /// Live window copied into a new file and rebased; ids older than the
    /// preserved window are now expired.
    Rewritten,
}

/// Plans and applies resizes against an allocator.
///
/// Must run under the owning log's exclusive lock.
pub(crate) struct ResizeManager<'a> {
    allocator: &'a mut CircularAllocator,
    /// Shared read handle to swap alongside the write handle on a rewrite.
    read_file: Option<&'a mut File>,
}

impl<'a> ResizeManager<'a> {
    pub fn new(allocator: &'a mut CircularAllocator) -> Self {
        Self {
            allocator,
            read_file: None,
        }
    }

    /// Also reopen `read_file` if the resize replaces the log file.
    pub fn with_read_handle(mut self, read_file: &'a mut File) -> Self {
        self.read_file = Some(read_file);
        self
    }

    /// Decide which path a resize to `new_size_kb` takes.
    pub fn plan(header: &LogHeader, new_size_kb: u32) -> ResizeKind {
        if new_size_kb == header.size_kb {
            return ResizeKind::Unchanged;
        }
        let new_size_bytes = new_size_kb as u64 * 1024;
        let live = header.curr_index - header.last_resize_base_index;
        if live < header.size_bytes().min(new_size_bytes) {
            ResizeKind::InPlace
        } else {
            ResizeKind::Rewritten
        }
    }

    /// Resize to `new_size_kb`.
    ///
    /// On error the allocator keeps its previous header and handles.
    pub fn resize(self, new_size_kb: u32) -> Result<ResizeKind> {
        if new_size_kb == 0 {
            return Err(Error::InvalidConfiguration(
                "size_kb must be at least 1".into(),
            ));
        }

        let header = self.allocator.header();
        let kind = Self::plan(&header, new_size_kb);
        match kind {
            ResizeKind::Unchanged => {}
            ResizeKind::InPlace => {
                self.allocator.set_size_kb(new_size_kb)?;
                debug!(
                    from_kb = header.size_kb,
                    to_kb = new_size_kb,
                    "resized capped log in place"
                );
            }
            ResizeKind::Rewritten => self.rewrite(header, new_size_kb)?,
        }
        Ok(kind)
    }

    fn rewrite(mut self, header: LogHeader, new_size_kb: u32) -> Result<()> {
        let path = self.allocator.path().to_path_buf();
        let temp_path = resize_temp_path(&path);
        delete_file(&temp_path)?;

        let num_keep = header.size_bytes().min(new_size_kb as u64 * 1024);
        let new_header = LogHeader {
            curr_index: header.curr_index,
            size_kb: new_size_kb,
            last_resize_base_index: header.curr_index - num_keep,
        };

        if let Err(e) = self.fill_temp(&temp_path, new_header, num_keep) {
            if let Err(cleanup) = delete_file(&temp_path) {
                warn!(error = %cleanup, "failed to remove resize temp file");
            }
            return Err(e);
        }

        if let Err(e) = std::fs::remove_file(&path) {
            let _ = delete_file(&temp_path);
            return Err(Error::resize(format!(
                "failed to delete {}: {}",
                path.display(),
                e
            )));
        }
        std::fs::rename(&temp_path, &path).map_err(|e| {
            Error::resize(format!(
                "failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;
        if let Err(e) = sync_parent_dir(&path) {
            warn!(error = %e, "failed to sync log directory after resize");
        }

        // Open both handles before swapping either.
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let new_read_file = match self.read_file {
            Some(_) => Some(File::open(&path)?),
            None => None,
        };
        self.allocator.replace_file(file, new_header);
        if let (Some(slot), Some(new_read_file)) = (self.read_file, new_read_file) {
            *slot = new_read_file;
        }

        info!(
            from_kb = header.size_kb,
            to_kb = new_size_kb,
            kept_bytes = num_keep,
            base = new_header.last_resize_base_index,
            "rewrote capped log for resize"
        );
        Ok(())
    }

    /// Write the rebased header and the newest `num_keep` bytes to `temp_path`.
    fn fill_temp(&mut self, temp_path: &Path, new_header: LogHeader, num_keep: u64) -> Result<()> {
        let mut temp = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(temp_path)?;
        temp.set_len(HEADER_SKIP_BYTES + new_header.size_bytes())?;
        new_header.write_to(&mut temp)?;

        // The header write leaves the cursor at the start of the data region,
        // where the oldest kept byte lands.
        let mut buf = vec![0u8; COPY_CHUNK_SIZE.min(num_keep as usize)];
        let mut copied = 0u64;
        while copied < num_keep {
            let want = ((num_keep - copied) as usize).min(buf.len());
            let n = self
                .allocator
                .read_contiguous(new_header.last_resize_base_index + copied, &mut buf[..want])?;
            temp.write_all(&buf[..n])?;
            copied += n as u64;
        }
        temp.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{read_contiguous, BLOCK_HEADER_SIZE};
    use crate::options::SyncMode;
    use std::path::Path;
    use tempfile::tempdir;

    fn open(dir: &Path, size_kb: u32) -> CircularAllocator {
        CircularAllocator::open(&dir.join("resize.capped"), size_kb, SyncMode::None, true).unwrap()
    }

    fn append(alloc: &mut CircularAllocator, payload: &[u8]) -> u64 {
        let mut window = alloc.reserve(payload.len() as u64).unwrap();
        window.write_all(payload).unwrap();
        window.commit().unwrap().as_u64()
    }

    fn read_payload(alloc: &mut CircularAllocator, id: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let logical = id + BLOCK_HEADER_SIZE + filled as u64;
            filled += alloc.read_contiguous(logical, &mut out[filled..]).unwrap();
        }
        out
    }

    #[test]
    fn test_plan() {
        let header = LogHeader {
            curr_index: 500,
            size_kb: 1,
            last_resize_base_index: 0,
        };
        assert_eq!(ResizeManager::plan(&header, 1), ResizeKind::Unchanged);
        assert_eq!(ResizeManager::plan(&header, 2), ResizeKind::InPlace);

        let wrapped = LogHeader {
            curr_index: 5000,
            ..header
        };
        assert_eq!(ResizeManager::plan(&wrapped, 2), ResizeKind::Rewritten);

        let rebased = LogHeader {
            curr_index: 5000,
            size_kb: 4,
            last_resize_base_index: 4900,
        };
        assert_eq!(ResizeManager::plan(&rebased, 1), ResizeKind::InPlace);
    }

    #[test]
    fn test_grow_in_place() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 1);
        let id = append(&mut alloc, b"keep me");

        let kind = ResizeManager::new(&mut alloc).resize(2).unwrap();
        assert_eq!(kind, ResizeKind::InPlace);
        assert_eq!(alloc.size_kb(), 2);
        assert_eq!(alloc.last_resize_base_index(), 0);
        assert_eq!(read_payload(&mut alloc, id, 7), b"keep me");

        let len = std::fs::metadata(alloc.path()).unwrap().len();
        assert_eq!(len, HEADER_SKIP_BYTES + 2048);
    }

    #[test]
    fn test_shrink_rewrites_recent_window() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 4);

        let mut ids = Vec::new();
        for i in 0..10u8 {
            ids.push(append(&mut alloc, &[i; 292]));
        }
        let cursor = alloc.current_cursor();
        assert_eq!(cursor, 3000);

        let kind = ResizeManager::new(&mut alloc).resize(1).unwrap();
        assert_eq!(kind, ResizeKind::Rewritten);
        assert_eq!(alloc.current_cursor(), cursor);
        assert_eq!(alloc.last_resize_base_index(), cursor - 1024);
        assert!(!resize_temp_path(alloc.path()).exists());

        // Blocks are 300 bytes: only the last three start inside the window.
        for (i, &id) in ids.iter().enumerate() {
            if i >= 7 {
                assert!(!alloc.is_stale(id));
                assert_eq!(read_payload(&mut alloc, id, 292), vec![i as u8; 292]);
            } else {
                assert!(alloc.is_stale(id), "id {} should be stale", id);
            }
        }

        // Writing continues from the rebased origin.
        let next = append(&mut alloc, b"after resize");
        assert_eq!(next, cursor);
        assert_eq!(read_payload(&mut alloc, next, 12), b"after resize");
    }

    #[test]
    fn test_rewrite_survives_reopen() {
        let dir = tempdir().unwrap();
        let (id, header) = {
            let mut alloc = open(dir.path(), 2);
            for _ in 0..8 {
                append(&mut alloc, &[1u8; 400]);
            }
            let id = append(&mut alloc, b"latest");
            ResizeManager::new(&mut alloc).resize(1).unwrap();
            (id, alloc.header())
        };

        let mut alloc = open(dir.path(), 1);
        assert_eq!(alloc.header(), header);
        assert_eq!(read_payload(&mut alloc, id, 6), b"latest");
    }

    #[test]
    fn test_rewrite_copy_wraps_region_end() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 2);

        let mut ids = Vec::new();
        for i in 0..23u8 {
            ids.push(append(&mut alloc, &[i; 92]));
        }
        assert_eq!(alloc.current_cursor(), 2300);

        // The kept kilobyte starts at physical 1276 and runs past the 2048 end.
        let new_base = 2300 - 1024;
        assert_eq!(alloc.to_physical_offset(new_base), 1276);

        let kind = ResizeManager::new(&mut alloc).resize(1).unwrap();
        assert_eq!(kind, ResizeKind::Rewritten);
        assert_eq!(alloc.last_resize_base_index(), new_base);

        let mut preserved = 0;
        for (i, &id) in ids.iter().enumerate() {
            if alloc.is_stale(id) {
                assert!(id < new_base);
                continue;
            }
            assert_eq!(read_payload(&mut alloc, id, 92), vec![i as u8; 92]);
            preserved += 1;
        }
        assert_eq!(preserved, 10);
    }

    #[test]
    fn test_failed_copy_removes_temp_file() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 2);
        for i in 0..23u8 {
            append(&mut alloc, &[i; 92]);
        }
        let before = alloc.header();

        // Cut the data region short behind the allocator's back.
        OpenOptions::new()
            .write(true)
            .open(alloc.path())
            .unwrap()
            .set_len(HEADER_SKIP_BYTES + 100)
            .unwrap();

        assert!(ResizeManager::new(&mut alloc).resize(1).is_err());
        assert!(!resize_temp_path(alloc.path()).exists());
        assert!(alloc.path().exists());
        assert_eq!(alloc.header(), before);
    }

    #[test]
    fn test_rewrite_swaps_read_handle() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 2);
        let mut read_file = File::open(alloc.path()).unwrap();

        let mut last = 0;
        for i in 0..23u8 {
            last = append(&mut alloc, &[i; 92]);
        }

        ResizeManager::new(&mut alloc)
            .with_read_handle(&mut read_file)
            .resize(1)
            .unwrap();

        // The shared handle addresses the rewritten file under the new header.
        let header = alloc.header();
        let mut buf = [0u8; 92];
        let mut filled = 0;
        while filled < buf.len() {
            let logical = last + BLOCK_HEADER_SIZE + filled as u64;
            filled += read_contiguous(&mut read_file, &header, logical, &mut buf[filled..]).unwrap();
        }
        assert_eq!(buf, [22u8; 92]);
    }

    #[test]
    fn test_zero_size_rejected() {
        let dir = tempdir().unwrap();
        let mut alloc = open(dir.path(), 1);
        assert!(ResizeManager::new(&mut alloc).resize(0).is_err());
        assert_eq!(alloc.size_kb(), 1);
    }
}
