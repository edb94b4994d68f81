//! Protocol module - message vocabulary and stream framing.
//!
//! - [`Message`] and its kinds: [`Ack`], [`Rpc`], [`ExtendedRpc`], [`RpcResponse`]
//! - [`IdGenerator`] for correlation ids
//! - [`FrameBuffer`] for splitting a length-prefixed byte stream into frames

mod frame_buffer;
mod message;

pub use frame_buffer::{encode_frame, FrameBuffer, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
pub use message::{Ack, ExtendedRpc, IdGenerator, Message, Rpc, RpcResponse};
