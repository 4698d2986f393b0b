//! Decoding context: input cursor plus a cheap diagnostic path.
//!
//! The path is a stack of static frames (type names, field names, indices,
//! union variants) pushed and popped around child decodes. Nothing is
//! stringified until an error actually materialises, so the context stays
//! enabled in production.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSeg {
    Type(&'static str),
    Field(&'static str),
    Variant(&'static str),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,
    #[error("enum ordinal out of range")]
    InvalidEnumTag,
    #[error("union tag out of range")]
    InvalidUnionTag,
    #[error("boolean byte is neither 0 nor 1")]
    InvalidBoolByte,
    #[error("optional presence byte is neither 0 nor 1")]
    InvalidOptionByte,
    #[error("sequence length does not match the declared size")]
    LengthMismatch,
    #[error("varint is not in canonical form")]
    NonCanonicalVarint,
    #[error("trailing bytes after a complete value")]
    TrailingBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at byte {offset}, path {path}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub offset: usize,
    pub path: String,
}

fn render_path(segs: &[PathSeg]) -> String {
    if segs.is_empty() {
        return "<root>".to_owned();
    }
    let mut out = String::new();
    for seg in segs {
        match seg {
            PathSeg::Type(name) => {
                if !out.is_empty() {
                    out.push(':');
                }
                out.push_str(name);
            }
            PathSeg::Field(name) => {
                out.push('.');
                out.push_str(name);
            }
            PathSeg::Variant(name) => {
                out.push_str("::");
                out.push_str(name);
            }
            PathSeg::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    path: Vec<PathSeg>,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, path: Vec::with_capacity(16) }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Materialise an error at the current position. The only place the path
    /// is rendered to a string.
    pub fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError { kind, offset: self.pos, path: render_path(&self.path) }
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEndOfStream))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(self.error(DecodeErrorKind::UnexpectedEndOfStream));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn push(&mut self, seg: PathSeg) {
        self.path.push(seg);
    }

    pub fn pop(&mut self) {
        self.path.pop();
    }

    /// Run `f` with a path frame pushed. The frame is left in place on error,
    /// which is fine: the error has already rendered the path, and a failed
    /// reader is abandoned.
    pub fn scoped<T>(
        &mut self,
        seg: PathSeg,
        f: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<T, DecodeError> {
        self.push(seg);
        let value = f(self)?;
        self.pop();
        Ok(value)
    }

    pub fn typed<T>(
        &mut self,
        name: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<T, DecodeError> {
        self.scoped(PathSeg::Type(name), f)
    }

    pub fn field<T: crate::codec::Decode>(&mut self, name: &'static str) -> Result<T, DecodeError> {
        self.scoped(PathSeg::Field(name), T::decode)
    }

    pub fn field_with<T>(
        &mut self,
        name: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<T, DecodeError> {
        self.scoped(PathSeg::Field(name), f)
    }
}

impl fmt::Debug for Reader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("pos", &self.pos)
            .field("len", &self.data.len())
            .field("path", &render_path(&self.path))
            .finish()
    }
}
