//! Per-block compression codecs.
//!
//! Every block is compressed independently, so a reader can decode any
//! surviving block without touching its neighbours. Decoding streams from
//! the block reader, which keeps decompression outside the log lock.

use std::fmt;
use std::io::{Read, Write};

use bytes::Bytes;

use crate::{Error, Result};

/// Stream transform applied to each block payload.
pub trait BlockCodec: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Compress a whole payload.
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a payload by streaming from `input` until it is exhausted.
    fn decode(&self, input: &mut dyn Read) -> Result<Bytes>;
}

/// Stores payloads as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl BlockCodec for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(payload.to_vec())
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Bytes> {
        let mut out = Vec::new();
        input.read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}

/// LZ4 frame format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl BlockCodec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::with_capacity(payload.len() / 2));
        encoder.write_all(payload)?;
        encoder
            .finish()
            .map_err(|e| Error::internal(format!("lz4 compress failed: {}", e)))
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Bytes> {
        let mut out = Vec::new();
        lz4_flex::frame::FrameDecoder::new(input).read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}

/// Snappy frame format.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnappyCodec;

impl BlockCodec for SnappyCodec {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = snap::write::FrameEncoder::new(Vec::with_capacity(payload.len() / 2));
        encoder.write_all(payload)?;
        encoder
            .into_inner()
            .map_err(|e| Error::internal(format!("snappy compress failed: {}", e)))
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Bytes> {
        let mut out = Vec::new();
        snap::read::FrameDecoder::new(input).read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..200 {
            data.extend_from_slice(format!("trace entry {} ", i % 7).as_bytes());
        }
        data
    }

    fn check(codec: &dyn BlockCodec) {
        let payload = sample();
        let encoded = codec.encode(&payload).unwrap();
        let decoded = codec.decode(&mut &encoded[..]).unwrap();
        assert_eq!(&decoded[..], &payload[..], "codec {}", codec.name());
    }

    #[test]
    fn test_codecs_decode_what_they_encode() {
        check(&NoCompression);
        check(&Lz4Codec);
        check(&SnappyCodec);
    }

    #[test]
    fn test_compression_shrinks_repetitive_data() {
        let payload = sample();
        assert!(Lz4Codec.encode(&payload).unwrap().len() < payload.len());
        assert!(SnappyCodec.encode(&payload).unwrap().len() < payload.len());
    }

    #[test]
    fn test_empty_payload() {
        let encoded = Lz4Codec.encode(b"").unwrap();
        let decoded = Lz4Codec.decode(&mut &encoded[..]).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_truncated_input_fails() {
        let payload = sample();
        let encoded = Lz4Codec.encode(&payload).unwrap();
        let truncated = &encoded[..encoded.len() / 2];
        assert!(Lz4Codec.decode(&mut &truncated[..]).is_err());

        let encoded = SnappyCodec.encode(&payload).unwrap();
        let truncated = &encoded[..encoded.len() / 2];
        assert!(SnappyCodec.decode(&mut &truncated[..]).is_err());
    }
}
