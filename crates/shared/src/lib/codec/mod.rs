//! Typed binary codec.
//!
//! A total, deterministic, injective mapping between protocol values and byte
//! strings. Leaf types implement [`Encode`]/[`Decode`]; containers whose
//! layout depends on protocol parameters (fixed per-core or per-validator
//! sequences with no length prefix) use the `*_fixed_*` helpers and surface
//! params-aware `encode_with`/`decode_with` methods on the owning type.

pub mod reader;
pub mod varint;

pub use reader::{DecodeError, DecodeErrorKind, PathSeg, Reader};
pub use varint::{decode_varint, encode_varint, varint};

use crate::primitives::{
    Ed25519Signature, Hash32, RingCommitment, RingVrfProof, ValidatorKeys, VrfSignature,
};

/// Length validation failure on the encode side: a field declared with a
/// params-known size holds a container of a different length.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("length mismatch encoding {what}: expected {expected}, got {actual}")]
pub struct EncodeError {
    pub what: &'static str,
    pub expected: usize,
    pub actual: usize,
}

pub trait Encode {
    fn encode_to(&self, out: &mut Vec<u8>);

    fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_to(&mut out);
        out
    }
}

pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;
}

pub fn decode_all<T: Decode>(data: &[u8]) -> Result<T, DecodeError> {
    let mut r = Reader::new(data);
    let value = T::decode(&mut r)?;
    if !r.is_empty() {
        return Err(r.error(DecodeErrorKind::TrailingBytes));
    }
    Ok(value)
}

// ---- integers (little-endian, fixed width) ----

macro_rules! impl_le_int {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode_to(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }

            impl Decode for $ty {
                fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                    Ok(<$ty>::from_le_bytes(r.read_array()?))
                }
            }
        )*
    };
}

impl_le_int!(u8, u16, u32, u64);

impl Encode for bool {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(r.error(DecodeErrorKind::InvalidBoolByte)),
        }
    }
}

// ---- fixed byte arrays and their wrappers ----

impl<const N: usize> Encode for [u8; N] {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.read_array()
    }
}

macro_rules! impl_byte_wrapper {
    ($($ty:ident),*) => {
        $(
            impl Encode for $ty {
                fn encode_to(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.0);
                }
            }

            impl Decode for $ty {
                fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                    Ok($ty(r.read_array()?))
                }
            }
        )*
    };
}

impl_byte_wrapper!(Hash32, Ed25519Signature, VrfSignature, RingVrfProof, RingCommitment);

impl Encode for ValidatorKeys {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.bandersnatch.encode_to(out);
        self.ed25519.encode_to(out);
        out.extend_from_slice(&self.bls);
        out.extend_from_slice(&self.metadata);
    }
}

impl Decode for ValidatorKeys {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("ValidatorKeys", |r| {
            Ok(Self {
                bandersnatch: r.field("bandersnatch")?,
                ed25519: r.field("ed25519")?,
                bls: r.field("bls")?,
                metadata: r.field("metadata")?,
            })
        })
    }
}

// ---- optionals ----

impl<T: Encode> Encode for Option<T> {
    fn encode_to(&self, out: &mut Vec<u8>) {
        match self {
            None => out.push(0),
            Some(value) => {
                out.push(1);
                value.encode_to(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.read_byte()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(r)?)),
            _ => Err(r.error(DecodeErrorKind::InvalidOptionByte)),
        }
    }
}

// ---- sequences ----

/// Length-prefixed byte string.
pub fn encode_blob(bytes: &[u8], out: &mut Vec<u8>) {
    encode_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

pub fn decode_blob(r: &mut Reader<'_>) -> Result<Vec<u8>, DecodeError> {
    let len = decode_varint(r)? as usize;
    Ok(r.read_bytes(len)?.to_vec())
}

/// Byte string with a length known from context; no prefix on the wire.
pub fn encode_fixed_blob(
    what: &'static str,
    bytes: &[u8],
    expected: usize,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    if bytes.len() != expected {
        return Err(EncodeError { what, expected, actual: bytes.len() });
    }
    out.extend_from_slice(bytes);
    Ok(())
}

pub fn decode_fixed_blob(r: &mut Reader<'_>, len: usize) -> Result<Vec<u8>, DecodeError> {
    Ok(r.read_bytes(len)?.to_vec())
}

/// Length-prefixed sequence of encodable items.
pub fn encode_seq<T: Encode>(items: &[T], out: &mut Vec<u8>) {
    encode_varint(items.len() as u64, out);
    for item in items {
        item.encode_to(out);
    }
}

pub fn decode_seq<T: Decode>(r: &mut Reader<'_>) -> Result<Vec<T>, DecodeError> {
    let len = decode_varint(r)? as usize;
    decode_items(r, len)
}

/// Sequence with a length known from context; no prefix on the wire.
pub fn encode_fixed_seq<T: Encode>(
    what: &'static str,
    items: &[T],
    expected: usize,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    if items.len() != expected {
        return Err(EncodeError { what, expected, actual: items.len() });
    }
    for item in items {
        item.encode_to(out);
    }
    Ok(())
}

pub fn decode_fixed_seq<T: Decode>(r: &mut Reader<'_>, count: usize) -> Result<Vec<T>, DecodeError> {
    decode_items(r, count)
}

fn decode_items<T: Decode>(r: &mut Reader<'_>, count: usize) -> Result<Vec<T>, DecodeError> {
    // Cap pre-allocation by the bytes actually left: every item consumes at
    // least one byte, so a hostile length cannot force a huge reservation.
    let mut items = Vec::with_capacity(count.min(r.remaining()));
    for i in 0..count {
        items.push(r.scoped(PathSeg::Index(i), T::decode)?);
    }
    Ok(items)
}
