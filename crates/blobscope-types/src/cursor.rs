//! Bounds-checked big-endian reader over a byte slice.
//!
//! Every read either succeeds or fails with [`AuditError::EndOfInput`]
//! carrying the absolute offset of the read. Structural failures detected by
//! callers are reported with [`ByteCursor::decode_error`], which stamps the
//! offset the same way.

use blobscope_error::{AuditError, Result};

/// Cursor over `bytes`, where `bytes[0]` sits at absolute offset `base`.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> ByteCursor<'a> {
    /// Cursor starting at the beginning of `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8], base: u64) -> Self {
        Self { bytes, pos: 0, base }
    }

    /// Relative position inside the slice.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Absolute offset of the next byte to be read.
    #[must_use]
    pub const fn absolute_offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// Absolute offset of `bytes[0]`.
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes consumed since relative position `start`.
    #[must_use]
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.bytes[start.min(self.pos)..self.pos]
    }

    /// Decode error stamped with the absolute offset of relative position `start`.
    #[must_use]
    pub fn decode_error(&self, start: usize, detail: impl Into<String>) -> AuditError {
        AuditError::decode(self.base + start as u64, detail)
    }

    fn end_of_input(&self, needed: usize) -> AuditError {
        AuditError::EndOfInput {
            offset: self.absolute_offset(),
            needed: needed as u64,
            available: self.remaining() as u64,
        }
    }

    /// Borrow the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.end_of_input(len));
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Advance past `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(raw);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read an `int32` length followed by that many UTF-8 bytes.
    pub fn read_int_string(&mut self) -> Result<String> {
        let start = self.pos;
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| self.decode_error(start, format!("negative string length {len}")))?;
        let raw = self.read_bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|err| self.decode_error(start, format!("string is not valid UTF-8: {err}")))
    }
}
