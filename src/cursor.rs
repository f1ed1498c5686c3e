//! Bounds-checked, offset-addressed reads over a byte buffer.
//!
//! Every structure in a ZIP or APK Signing Block is length-prefixed, so every read goes through
//! here. The cursor has no position of its own: callers always pass the offset they mean, which
//! keeps size fields read at different points from drifting apart.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ApkError, Result};

/// A read-only view over `[0, len)` of some byte buffer.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The whole underlying buffer.
    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }

    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        Ok(self.read_slice(offset, 1)?[0])
    }

    pub fn read_u16_le(&self, offset: u64) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.read_slice(offset, 2)?))
    }

    pub fn read_u32_le(&self, offset: u64) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_slice(offset, 4)?))
    }

    pub fn read_u64_le(&self, offset: u64) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_slice(offset, 8)?))
    }

    /// Borrow `length` bytes starting at `offset`.
    ///
    /// Fails with [`ApkError::OutOfBounds`] if the range leaves the buffer or if `offset + length`
    /// overflows.
    pub fn read_slice(&self, offset: u64, length: u64) -> Result<&'a [u8]> {
        let out_of_bounds = || ApkError::OutOfBounds {
            offset,
            width: length,
            len: self.len(),
        };

        let end = offset.checked_add(length).ok_or_else(out_of_bounds)?;
        if end > self.len() {
            return Err(out_of_bounds());
        }

        // Both fit in the buffer length, which is a usize.
        Ok(&self.data[offset as usize..end as usize])
    }

    /// A cursor over `[offset, offset + length)`, addressed from zero.
    pub fn sub_cursor(&self, offset: u64, length: u64) -> Result<ByteCursor<'a>> {
        self.read_slice(offset, length).map(ByteCursor::new)
    }

    /// Compare the bytes at `offset` against `expected` without failing on short input.
    pub fn matches_at(&self, offset: u64, expected: &[u8]) -> bool {
        self.read_slice(offset, expected.len() as u64)
            .is_ok_and(|bytes| bytes == expected)
    }
}
