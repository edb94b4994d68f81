//! Error types for statewire.
//!
//! Two families of failure exist and they never mix:
//!
//! - [`WireError`] covers transport, codec and protocol failures. These are
//!   fatal for the message in progress and may tear down the connection.
//! - [`InvocationError`] covers everything that can go wrong while serving a
//!   call. It is serializable and travels back to the caller inside
//!   [`RpcResponse::exception`](crate::protocol::RpcResponse), so a single
//!   connection survives any number of failed calls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for all statewire operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error during stream operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Failure reading a MsgPack value tree.
    #[error("MsgPack value read error: {0}")]
    ValueRead(#[from] rmpv::decode::Error),

    /// Failure converting between typed data and a MsgPack value tree.
    #[error("MsgPack value conversion error: {0}")]
    ValueConvert(#[from] rmpv::ext::Error),

    /// Protocol error (bad tag, oversized frame, malformed segment, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A data segment referenced a shape the peer never described.
    #[error("Unknown shape id: {0}")]
    UnknownShape(u32),

    /// Encryption or decryption failed (key mismatch or tampering).
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// The remote end answered a call with an exception.
    #[error("Remote error: {0}")]
    Remote(#[from] InvocationError),
}

/// Failure raised while resolving or invoking a call.
///
/// Carried as data in the reply, never as a connection fault.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum InvocationError {
    /// The identifier did not resolve to a target object.
    #[error("no target registered for identifier {0}")]
    NoSuchTarget(String),

    /// The method descriptor could not be resolved, or the target has no
    /// method with that name and parameter types.
    #[error("no such method: {0}")]
    NoSuchMethod(String),

    /// The call arguments do not fit the method's parameters.
    #[error("invalid arguments for {method}: {reason}")]
    InvalidArguments { method: String, reason: String },

    /// No `ExtendedRpc` for the method id arrived within the deadline.
    #[error("method id {method_id} was not bound within {waited_ms} ms")]
    BindingTimeout { method_id: u32, waited_ms: u64 },

    /// The invoked handler itself failed.
    #[error("{0}")]
    Failed(String),
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;
