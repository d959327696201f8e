//! File header: the single source of truth for allocator state.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::{Buf, BufMut, BytesMut};

use crate::{Error, Result};

use super::HEADER_SKIP_BYTES;

/// Persisted allocator state, stored big-endian at offset 0.
///
/// ```text
/// ┌───────────────┬───────────┬───────────────────────┐
/// │ curr_index u64│ size_kb u32│ last_resize_base u64 │
/// └───────────────┴───────────┴───────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Bytes logically written since the file was created.
    pub curr_index: u64,
    /// Capacity of the data region in kilobytes.
    pub size_kb: u32,
    /// Smallest index still valid after the most recent resize.
    pub last_resize_base_index: u64,
}

impl LogHeader {
    /// Header for a freshly created log.
    pub fn new(size_kb: u32) -> Self {
        Self {
            curr_index: 0,
            size_kb,
            last_resize_base_index: 0,
        }
    }

    /// Capacity of the data region in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size_kb as u64 * 1024
    }

    /// Encode to the fixed on-disk layout.
    pub fn encode(&self) -> [u8; HEADER_SKIP_BYTES as usize] {
        let mut buf = BytesMut::with_capacity(HEADER_SKIP_BYTES as usize);
        buf.put_u64(self.curr_index);
        buf.put_u32(self.size_kb);
        buf.put_u64(self.last_resize_base_index);

        let mut out = [0u8; HEADER_SKIP_BYTES as usize];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode and validate a header.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SKIP_BYTES as usize {
            return Err(Error::invalid_format(format!(
                "header too short: {} bytes",
                data.len()
            )));
        }

        let header = Self {
            curr_index: data.get_u64(),
            size_kb: data.get_u32(),
            last_resize_base_index: data.get_u64(),
        };

        if header.size_kb == 0 {
            return Err(Error::invalid_format("header size_kb is zero"));
        }
        if header.last_resize_base_index > header.curr_index {
            return Err(Error::invalid_format(format!(
                "resize base {} is past the write cursor {}",
                header.last_resize_base_index, header.curr_index
            )));
        }

        Ok(header)
    }

    /// Read the header from the start of a log file.
    pub fn read_from(file: &mut File) -> Result<Self> {
        let mut buf = [0u8; HEADER_SKIP_BYTES as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        Self::decode(&buf)
    }

    /// Write the header at the start of a log file (no sync).
    pub fn write_to(&self, file: &mut File) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.encode())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_big_endian() {
        let header = LogHeader {
            curr_index: 0x0102,
            size_kb: 3,
            last_resize_base_index: 0x0405,
        };
        let encoded = header.encode();

        assert_eq!(encoded.len(), 20);
        assert_eq!(&encoded[0..8], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
        assert_eq!(&encoded[8..12], &[0, 0, 0, 3]);
        assert_eq!(&encoded[12..20], &[0, 0, 0, 0, 0, 0, 0x04, 0x05]);
        assert_eq!(LogHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_bad_state() {
        assert!(LogHeader::decode(&[0u8; 10]).is_err());

        // size_kb == 0
        assert!(LogHeader::decode(&[0u8; 20]).is_err());

        let bad = LogHeader {
            curr_index: 5,
            size_kb: 1,
            last_resize_base_index: 6,
        };
        let err = LogHeader::decode(&bad.encode()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_header_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.capped");
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();

        let header = LogHeader {
            curr_index: 4096,
            size_kb: 8,
            last_resize_base_index: 1024,
        };
        header.write_to(&mut file).unwrap();
        assert_eq!(LogHeader::read_from(&mut file).unwrap(), header);
    }
}
