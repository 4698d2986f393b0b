//! Variable-length natural-number encoding, range 0..2^64.
//!
//! Zero is one byte 0x00; 1..=127 is the value itself; larger values take a
//! prefix byte whose count of leading one bits gives the tail length, the
//! remaining prefix bits holding the high part of the value and the tail the
//! low bytes little-endian. A full 8-byte tail uses prefix 0xFF. Encodings
//! are minimal; the decoder rejects non-canonical forms.

use super::reader::{DecodeError, DecodeErrorKind, Reader};

pub fn encode_varint(value: u64, out: &mut Vec<u8>) {
    if value < 128 {
        out.push(value as u8);
        return;
    }
    for tail_len in 1u32..8 {
        if value < 1u64 << (7 * (tail_len + 1)) {
            let prefix = 256 - (1u64 << (8 - tail_len)) + (value >> (8 * tail_len));
            out.push(prefix as u8);
            out.extend_from_slice(&value.to_le_bytes()[..tail_len as usize]);
            return;
        }
    }
    out.push(0xFF);
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn varint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    encode_varint(value, &mut out);
    out
}

pub fn decode_varint(r: &mut Reader<'_>) -> Result<u64, DecodeError> {
    let first = r.read_byte()?;
    if first < 128 {
        return Ok(u64::from(first));
    }
    let tail_len = first.leading_ones() as usize;
    if tail_len == 8 {
        let tail: [u8; 8] = r.read_array()?;
        let value = u64::from_le_bytes(tail);
        if value < 1u64 << 56 {
            return Err(r.error(DecodeErrorKind::NonCanonicalVarint));
        }
        return Ok(value);
    }
    let prefix_base = 256 - (1u64 << (8 - tail_len));
    let mut tail = [0u8; 8];
    tail[..tail_len].copy_from_slice(r.read_bytes(tail_len)?);
    let value = ((u64::from(first) - prefix_base) << (8 * tail_len)) | u64::from_le_bytes(tail);
    if value < 1u64 << (7 * tail_len) {
        return Err(r.error(DecodeErrorKind::NonCanonicalVarint));
    }
    Ok(value)
}
