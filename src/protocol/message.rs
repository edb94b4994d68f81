//! Call, reply and acknowledgment messages.
//!
//! Every message carries a correlation id drawn from an [`IdGenerator`].
//! Ids are unique and increasing but say nothing about handling order.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::error::InvocationError;

/// Monotonic correlation id source.
///
/// Clones share the same counter. [`IdGenerator::global`] is the process-wide
/// sequence used unless a wider or narrower correlation domain is injected.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    counter: Arc<AtomicU32>,
}

impl IdGenerator {
    /// A fresh, independent sequence starting at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide sequence.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<IdGenerator> = OnceLock::new();
        GLOBAL.get_or_init(IdGenerator::new).clone()
    }

    #[inline]
    pub fn next_id(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

/// Acknowledges delivery of the call or reply with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub id: u32,
}

impl Ack {
    pub fn new(id: u32) -> Self {
        Self { id }
    }
}

/// Compact call referencing a method bound earlier on this connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rpc {
    pub id: u32,
    pub method_id: u32,
    pub identifier: Value,
    pub args: Vec<Value>,
    /// Identifiers the caller no longer holds handles for.
    #[serde(default)]
    pub deleted_identifiers: Option<Vec<Value>>,
}

impl Rpc {
    pub fn new(ids: &IdGenerator, method_id: u32, identifier: Value, args: Vec<Value>) -> Self {
        Self::with_id(ids.next_id(), method_id, identifier, args)
    }

    pub fn with_id(id: u32, method_id: u32, identifier: Value, args: Vec<Value>) -> Self {
        Self {
            id,
            method_id,
            identifier,
            args,
            deleted_identifiers: None,
        }
    }

    pub fn set_deleted_identifiers(&mut self, identifiers: Vec<Value>) {
        self.deleted_identifiers = Some(identifiers);
    }
}

/// First call for a method id; also binds the id to `serializable_method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedRpc {
    pub rpc: Rpc,
    pub serializable_method: Value,
}

impl ExtendedRpc {
    pub fn new(
        ids: &IdGenerator,
        serializable_method: Value,
        method_id: u32,
        identifier: Value,
        args: Vec<Value>,
    ) -> Self {
        Self::with_id(ids.next_id(), serializable_method, method_id, identifier, args)
    }

    pub fn with_id(
        id: u32,
        serializable_method: Value,
        method_id: u32,
        identifier: Value,
        args: Vec<Value>,
    ) -> Self {
        Self {
            rpc: Rpc::with_id(id, method_id, identifier, args),
            serializable_method,
        }
    }
}

/// Reply to a call. `exception` is payload, not a transport failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u32,
    pub response: Option<Value>,
    #[serde(default)]
    pub exception: Option<InvocationError>,
    #[serde(default)]
    pub removed_identifiers: Option<Vec<Value>>,
}

impl RpcResponse {
    pub fn ok(id: u32, response: Value) -> Self {
        Self {
            id,
            response: Some(response),
            exception: None,
            removed_identifiers: None,
        }
    }

    pub fn err(id: u32, exception: InvocationError) -> Self {
        Self {
            id,
            response: None,
            exception: Some(exception),
            removed_identifiers: None,
        }
    }

    /// Collapse the reply into the caller-side result.
    pub fn into_result(self) -> std::result::Result<Value, InvocationError> {
        match self.exception {
            Some(exception) => Err(exception),
            None => Ok(self.response.unwrap_or(Value::Nil)),
        }
    }
}

/// Everything that travels over a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Ack(Ack),
    Rpc(Rpc),
    ExtendedRpc(ExtendedRpc),
    Response(RpcResponse),
}

impl Message {
    pub fn id(&self) -> u32 {
        match self {
            Message::Ack(m) => m.id,
            Message::Rpc(m) => m.id,
            Message::ExtendedRpc(m) => m.rpc.id,
            Message::Response(m) => m.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ack(_) => "Ack",
            Message::Rpc(_) => "Rpc",
            Message::ExtendedRpc(_) => "ExtendedRpc",
            Message::Response(_) => "Response",
        }
    }
}

impl From<Ack> for Message {
    fn from(m: Ack) -> Self {
        Message::Ack(m)
    }
}

impl From<Rpc> for Message {
    fn from(m: Rpc) -> Self {
        Message::Rpc(m)
    }
}

impl From<ExtendedRpc> for Message {
    fn from(m: ExtendedRpc) -> Self {
        Message::ExtendedRpc(m)
    }
}

impl From<RpcResponse> for Message {
    fn from(m: RpcResponse) -> Self {
        Message::Response(m)
    }
}
