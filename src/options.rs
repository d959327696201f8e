//! Configuration options for cappedlog.

use std::sync::Arc;

use crate::codec::{BlockCodec, Lz4Codec, NoCompression, SnappyCodec};

/// Default capacity (64MB, expressed in kilobytes).
pub const DEFAULT_SIZE_KB: u32 = 64 * 1024;

/// Default physical read size per locked chunk (32KB).
pub const DEFAULT_READ_CHUNK_SIZE: usize = 32 * 1024;

/// Smallest allowed read chunk.
pub const MIN_READ_CHUNK_SIZE: usize = 512;

/// Compression algorithm applied to each block independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// No compression.
    None,
    /// LZ4 frame compression (fast).
    #[default]
    Lz4,
    /// Snappy frame compression (very fast).
    Snappy,
}

impl Compression {
    /// Check if compression is enabled.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Compression::None)
    }
}

/// Durability mode for block commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync block data, then fsync the header, after every block.
    #[default]
    Always,
    /// Let the OS decide when to sync (fastest, may lose recent blocks on crash).
    None,
}

/// Capped log configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    // === Storage ===
    /// Capacity of the circular data region in kilobytes.
    pub size_kb: u32,

    /// Create the log file if it doesn't exist.
    pub create_if_missing: bool,

    /// Resize an existing log to `size_kb` if its header disagrees.
    pub resize_on_open: bool,

    /// Hold an exclusive advisory lock next to the log file.
    pub lock_file: bool,

    // === Blocks ===
    /// Compression algorithm for block payloads.
    pub compression: Compression,

    /// Physical bytes read per lock acquisition while streaming a block.
    pub read_chunk_size: usize,

    // === Durability ===
    /// Sync mode for block commits.
    pub sync_mode: SyncMode,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            size_kb: DEFAULT_SIZE_KB,
            create_if_missing: true,
            resize_on_open: true,
            lock_file: true,
            compression: Compression::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            sync_mode: SyncMode::default(),
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.size_kb == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "size_kb must be at least 1".into(),
            ));
        }

        if self.read_chunk_size < MIN_READ_CHUNK_SIZE {
            return Err(crate::Error::InvalidConfiguration(format!(
                "read_chunk_size must be at least {} bytes",
                MIN_READ_CHUNK_SIZE
            )));
        }

        Ok(())
    }

    /// Capacity of the data region in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size_kb as u64 * 1024
    }

    /// Build the block codec selected by `compression`.
    pub fn codec(&self) -> Arc<dyn BlockCodec> {
        match self.compression {
            Compression::None => Arc::new(NoCompression),
            Compression::Lz4 => Arc::new(Lz4Codec),
            Compression::Snappy => Arc::new(SnappyCodec),
        }
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity in kilobytes.
    pub fn size_kb(mut self, size_kb: u32) -> Self {
        self.options.size_kb = size_kb;
        self
    }

    /// Set create_if_missing.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.options.create_if_missing = value;
        self
    }

    /// Set resize_on_open.
    pub fn resize_on_open(mut self, value: bool) -> Self {
        self.options.resize_on_open = value;
        self
    }

    /// Set lock_file.
    pub fn lock_file(mut self, value: bool) -> Self {
        self.options.lock_file = value;
        self
    }

    /// Set compression.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.options.compression = compression;
        self
    }

    /// Set the read chunk size.
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.options.read_chunk_size = size;
        self
    }

    /// Set sync mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.options.sync_mode = mode;
        self
    }

    /// Build the options.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}
