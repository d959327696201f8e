//! Varint length-prefixed framing for batched sub-records.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum bytes needed to encode a varint64.
pub const MAX_VARINT64_LEN: usize = 10;

/// Encode a 64-bit unsigned integer as a varint.
///
/// Returns the number of bytes written.
pub fn encode_varint64(buf: &mut BytesMut, mut value: u64) -> usize {
    let mut count = 0;
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
        count += 1;
    }
    buf.put_u8(value as u8);
    count + 1
}

/// Decode a 64-bit varint from a buffer.
///
/// Returns None if the buffer is too short or the varint is malformed.
pub fn decode_varint64(buf: &mut &[u8]) -> Option<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    for _ in 0..MAX_VARINT64_LEN {
        if buf.is_empty() {
            return None;
        }

        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            return Some(result);
        }

        shift += 7;
    }

    None // Varint too long
}

/// Get the number of bytes needed to encode a varint.
pub fn varint_length(value: u64) -> usize {
    let mut len = 1;
    let mut v = value;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Encode a length-prefixed byte slice.
pub fn encode_length_prefixed(buf: &mut BytesMut, data: &[u8]) {
    encode_varint64(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Decode a length-prefixed byte slice.
pub fn decode_length_prefixed(buf: &mut &[u8]) -> Option<Bytes> {
    let len = decode_varint64(buf)? as usize;
    if buf.len() < len {
        return None;
    }
    let data = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Some(data)
}

/// Frame a batch of records into one buffer.
pub fn encode_records<T: AsRef<[u8]>>(records: &[T]) -> BytesMut {
    let total: usize = records
        .iter()
        .map(|r| varint_length(r.as_ref().len() as u64) + r.as_ref().len())
        .sum();
    let mut buf = BytesMut::with_capacity(total);
    for record in records {
        encode_length_prefixed(&mut buf, record.as_ref());
    }
    buf
}

/// Split a framed batch back into records.
///
/// Returns None if the data ends in a partial or malformed record.
pub fn decode_records(mut data: &[u8]) -> Option<Vec<Bytes>> {
    let mut records = Vec::new();
    while !data.is_empty() {
        records.push(decode_length_prefixed(&mut data)?);
    }
    Some(records)
}
