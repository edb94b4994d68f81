//! Codec module - stateful serialization of messages into wire segments.
//!
//! A [`StatefulCodec`] turns a value into a [`DataStatePair`]: a mandatory
//! DATA segment and an optional STATE segment carrying whatever the receiver
//! must learn before it can decode the data. Codecs stack:
//!
//! - [`MsgPackCodec`] - plain MessagePack (`rmp-serde`, struct-as-map)
//! - [`DefaultStatefulCodec`] - MessagePack with a shared shape dictionary
//! - [`CipherCodec`] - encrypts the segments produced by an inner codec
//!
//! # Example
//!
//! ```
//! use statewire::codec::{DefaultStatefulCodec, StatefulCodec};
//!
//! let sender = DefaultStatefulCodec::<Vec<u32>>::new();
//! let receiver = DefaultStatefulCodec::<Vec<u32>>::new();
//!
//! let pair = sender.encode(&vec![1, 2, 3]).unwrap();
//! assert_eq!(receiver.decode(pair).unwrap(), vec![1, 2, 3]);
//! ```

mod cipher;
mod msgpack;
mod shape;
mod slice;
mod stateful;

pub use cipher::{CipherCodec, PublicKey, SecretKey, SEAL_OVERHEAD};
pub use msgpack::MsgPackCodec;
pub use slice::Slice;
pub use stateful::DefaultStatefulCodec;

use crate::error::Result;

/// Tag byte leading every wire segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Codec state refresh; always followed by its DATA segment.
    State = 0x01,
    /// Message payload.
    Data = 0x02,
}

impl MessageType {
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::State),
            0x02 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Output of a codec: the data segment plus an optional state refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStatePair {
    pub data: Slice,
    pub state: Option<Slice>,
}

impl DataStatePair {
    pub fn new(data: Slice, state: Option<Slice>) -> Self {
        Self { data, state }
    }
}

/// Serializer that may emit an infrequently-changing state segment.
///
/// Implementations are shared between the send and receive paths of a
/// connection, so they must be internally synchronized.
pub trait StatefulCodec<T>: Send + Sync {
    /// Encode a value. `state` is present only when the peer needs a refresh.
    fn encode(&self, value: &T) -> Result<DataStatePair>;

    /// Decode a pair, applying its state (if any) before the data.
    fn decode(&self, pair: DataStatePair) -> Result<T>;

    /// Forget everything communicated so far (e.g. on reconnect).
    fn reset_state(&self);

    /// Forget what this side has told the peer, keeping what it learned.
    ///
    /// Called when a pair carrying state may not have reached the peer;
    /// the next encode describes its shapes again.
    fn discard_outbound_state(&self);
}
