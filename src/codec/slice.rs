//! Byte-range views over shared buffers.

use bytes::Bytes;

use crate::error::{Result, WireError};

/// A view of `length` bytes starting at `offset` inside `buffer`.
///
/// One slice is one wire segment: a leading [`MessageType`](super::MessageType)
/// tag byte followed by the payload. Transforms that change the size (such as
/// encryption) produce a new slice over a fresh buffer with `offset == 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    buffer: Bytes,
    offset: usize,
    length: usize,
}

impl Slice {
    /// Create a slice, checking `offset + length <= buffer.len()`.
    pub fn new(buffer: Bytes, offset: usize, length: usize) -> Result<Self> {
        match offset.checked_add(length) {
            Some(end) if end <= buffer.len() => Ok(Self {
                buffer,
                offset,
                length,
            }),
            _ => Err(WireError::Protocol(format!(
                "slice {}+{} out of bounds for buffer of {} bytes",
                offset,
                length,
                buffer.len()
            ))),
        }
    }

    /// A slice covering the whole buffer.
    pub fn whole(buffer: Bytes) -> Self {
        let length = buffer.len();
        Self {
            buffer,
            offset: 0,
            length,
        }
    }

    /// Build a segment from a tag byte and a payload.
    pub fn tagged(tag: u8, payload: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(payload.len() + 1);
        buf.push(tag);
        buf.extend_from_slice(payload);
        Self::whole(Bytes::from(buf))
    }

    #[inline]
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The viewed bytes, tag included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }

    /// Leading tag byte, if the segment is non-empty.
    #[inline]
    pub fn tag(&self) -> Option<u8> {
        self.as_bytes().first().copied()
    }

    /// Bytes after the tag.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        let bytes = self.as_bytes();
        if bytes.is_empty() {
            bytes
        } else {
            &bytes[1..]
        }
    }

    /// The viewed bytes as a `Bytes` handle (zero-copy).
    pub fn to_bytes(&self) -> Bytes {
        self.buffer.slice(self.offset..self.offset + self.length)
    }
}
