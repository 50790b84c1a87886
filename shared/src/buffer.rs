//! Little-endian field codec used by every packet body.
//!
//! `PacketReader` walks exactly one framed message and never reads past it;
//! `PacketWriter` builds the bytes of one outgoing message.

use crate::error::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Cursor over a single framed message
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    frame: &'a [u8],
    cursor: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(frame: &'a [u8]) -> Self {
        Self {
            frame,
            cursor: frame,
        }
    }

    /// The whole frame this reader was created over, opcode included
    pub fn frame(&self) -> &'a [u8] {
        self.frame
    }

    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    pub fn position(&self) -> usize {
        self.frame.len() - self.cursor.len()
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if self.cursor.remaining() < needed {
            return Err(CodecError::ShortRead {
                needed,
                remaining: self.cursor.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.cursor.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        self.ensure(1)?;
        Ok(self.cursor.get_i8())
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.cursor.get_u16_le())
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.ensure(2)?;
        Ok(self.cursor.get_i16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.cursor.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.cursor.get_i32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.ensure(8)?;
        Ok(self.cursor.get_u64_le())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(len)?;
        let (head, tail) = self.cursor.split_at(len);
        self.cursor = tail;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_fixed_string<const N: usize>(&mut self) -> Result<FixedString<N>, CodecError> {
        Ok(FixedString(self.read_array::<N>()?))
    }

    pub fn skip(&mut self, len: usize) -> Result<(), CodecError> {
        self.ensure(len)?;
        self.cursor.advance(len);
        Ok(())
    }

    /// Consumes and returns everything left in the frame
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.cursor;
        self.cursor = &[];
        rest
    }
}

/// Builder for one outgoing message
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_fixed_string<const N: usize>(&mut self, value: &FixedString<N>) {
        self.buf.put_slice(&value.0);
    }

    /// Overwrites a previously written u16, used for variable-length prefixes
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// NUL-padded fixed-width string field.
///
/// Keeps the raw bytes so that a decoded message re-encodes to exactly the
/// bytes it came from, including whatever follows the terminator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedString<const N: usize>(pub [u8; N]);

impl<const N: usize> FixedString<N> {
    /// Truncates `value` so that at least one terminating NUL remains
    pub fn new(value: &str) -> Self {
        let mut raw = [0u8; N];
        let take = value.len().min(N.saturating_sub(1));
        raw[..take].copy_from_slice(&value.as_bytes()[..take]);
        Self(raw)
    }

    pub fn as_str(&self) -> String {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(N);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> Default for FixedString<N> {
    fn default() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> fmt::Debug for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> From<&str> for FixedString<N> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
