//! Shared helpers: record framing and file naming.

pub mod coding;
pub mod filename;
