//! Execution context handed to context-aware methods and resolvers.

use std::sync::Arc;

use rmpv::Value;

use crate::client::Client;
use crate::codec::StatefulCodec;
use crate::protocol::{Message, Rpc};

/// Describes the call being served and the connection it arrived on.
///
/// `ExecutionContext` is `Clone`; handlers may keep it past their own
/// return, e.g. to push further messages over [`client`](Self::client).
#[derive(Clone)]
pub struct ExecutionContext {
    client: Client<Message>,
    call_id: u32,
    method_id: u32,
    identifier: Value,
}

impl ExecutionContext {
    pub fn new(client: Client<Message>, call: &Rpc) -> Self {
        Self {
            client,
            call_id: call.id,
            method_id: call.method_id,
            identifier: call.identifier.clone(),
        }
    }

    /// Correlation id of the call; the reply carries the same id.
    #[inline]
    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    #[inline]
    pub fn method_id(&self) -> u32 {
        self.method_id
    }

    /// Identifier the call was addressed to.
    #[inline]
    pub fn identifier(&self) -> &Value {
        &self.identifier
    }

    /// The codec currently active on the connection.
    pub fn codec(&self) -> Arc<dyn StatefulCodec<Message>> {
        self.client.codec()
    }

    pub fn client(&self) -> &Client<Message> {
        &self.client
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("call_id", &self.call_id)
            .field("method_id", &self.method_id)
            .field("identifier", &self.identifier)
            .finish()
    }
}
