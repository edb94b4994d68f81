//! Transport module - the outbound byte-stream contract.
//!
//! The protocol core only needs to "write this frame now" and to report
//! write-path failures. Framing the stream and reading from it live in
//! [`protocol::FrameBuffer`](crate::protocol::FrameBuffer) and the client's
//! read loop.

mod writer;

pub use writer::{
    spawn_writer_task, WriterConfig, WriterHandle, DEFAULT_BACKPRESSURE_TIMEOUT,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_PENDING_FRAMES,
};

use bytes::Bytes;

use crate::error::{Result, WireError};
use crate::executor::BoxFuture;

/// Outbound half of a connection.
pub trait Transport: Send + Sync + 'static {
    /// Append one frame to the outbound stream.
    fn write(&self, frame: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Sink for failures on the write path.
    fn handle_exception(&self, error: &WireError) {
        tracing::error!("Write path error: {}", error);
    }
}
