//! Length-prefixed framing of the byte stream.
//!
//! Every segment travels as `[u32 BE length][segment bytes]`. The reader side
//! may see any split of that stream; [`FrameBuffer`] reassembles it and hands
//! out whole segments in arrival order.
//!
//! # Example
//!
//! ```
//! use statewire::protocol::{encode_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let wire = encode_frame(b"\x02hello");
//!
//! assert!(buffer.push(&wire[..3]).unwrap().is_empty());
//! let frames = buffer.push(&wire[3..]).unwrap();
//! assert_eq!(&frames[0][..], b"\x02hello");
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

const INITIAL_CAPACITY: usize = 64 * 1024;

/// Prefix `frame` with its length.
pub fn encode_frame(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + frame.len());
    out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
    out.extend_from_slice(frame);
    out
}

/// Reassembles length-prefixed frames from arbitrary read chunks.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    /// Length of the frame whose prefix has been consumed but whose body
    /// is still incomplete.
    expected: Option<usize>,
    max_frame_size: u32,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            expected: None,
            max_frame_size,
        }
    }

    /// Append a read chunk and return every frame it completes.
    ///
    /// # Errors
    ///
    /// [`WireError::Protocol`] when a length prefix exceeds the configured
    /// maximum. The stream cannot be resynchronised after that.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let length = match self.expected {
                Some(length) => length,
                None if self.buffer.len() >= LENGTH_PREFIX_SIZE => {
                    let length = self.buffer.get_u32();
                    if length > self.max_frame_size {
                        return Err(WireError::Protocol(format!(
                            "Frame size {} exceeds maximum {}",
                            length, self.max_frame_size
                        )));
                    }
                    length as usize
                }
                None => break,
            };

            if self.buffer.len() < length {
                self.expected = Some(length);
                break;
            }

            self.expected = None;
            frames.push(self.buffer.split_to(length).freeze());
        }
        Ok(frames)
    }

    /// A frame body has been announced but not fully received.
    pub fn is_mid_frame(&self) -> bool {
        self.expected.is_some()
    }

    /// Buffered bytes not yet returned as frames, prefix excluded.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop buffered input (reconnect).
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.expected = None;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
