//! Calling side of the protocol.
//!
//! A [`Caller`] is the [`MessageHandler`] of a connection that issues calls.
//! It assigns method ids per connection, starting at 1, the first time a
//! signature is used. That first call travels as an `ExtendedRpc` carrying
//! the method descriptor; every later call for the same signature is a
//! compact `Rpc`. Replies are matched to calls by id.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use statewire::{Caller, ClientBuilder, Message, MethodSignature};
//!
//! let caller = Caller::new();
//! let connection = ClientBuilder::<Message>::new().connect(stream, Arc::new(caller.clone()));
//!
//! let sum = MethodSignature::new("sum", ["i64", "i64"]);
//! let five: i64 = caller.invoke(connection.client(), "calc", &sum, (2, 3)).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::client::{Client, MessageHandler};
use crate::dispatch::{Dispatcher, MethodSerializer, MethodSignature, NamedMethodSerializer};
use crate::error::{Result, WireError};
use crate::executor::BoxFuture;
use crate::protocol::{ExtendedRpc, IdGenerator, Message, Rpc, RpcResponse};

/// Issues calls over a connection and collects their replies. Cheap to clone.
#[derive(Clone)]
pub struct Caller {
    inner: Arc<CallerInner>,
}

struct CallerInner {
    ids: IdGenerator,
    method_serializer: Arc<dyn MethodSerializer>,
    methods: Mutex<MethodIds>,
    pending: Mutex<HashMap<u32, oneshot::Sender<RpcResponse>>>,
    released: Mutex<Vec<Value>>,
    /// Held from id assignment until the call is written, so an `Rpc`
    /// never reaches the wire ahead of the `ExtendedRpc` binding its id.
    send_order: tokio::sync::Mutex<()>,
    dispatcher: Option<Dispatcher>,
}

#[derive(Default)]
struct MethodIds {
    by_signature: HashMap<MethodSignature, u32>,
    last: u32,
}

impl MethodIds {
    /// Id for `signature`, and whether this is its first use.
    fn assign(&mut self, signature: &MethodSignature) -> (u32, bool) {
        if let Some(&id) = self.by_signature.get(signature) {
            return (id, false);
        }
        self.last += 1;
        self.by_signature.insert(signature.clone(), self.last);
        (self.last, true)
    }
}

impl Caller {
    /// Caller on the process-wide id sequence with [`NamedMethodSerializer`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CallerBuilder {
        CallerBuilder {
            ids: IdGenerator::global(),
            method_serializer: Arc::new(NamedMethodSerializer),
            dispatcher: None,
        }
    }

    /// Call `signature` on the target named `identifier` and wait for the
    /// reply.
    ///
    /// # Errors
    ///
    /// [`WireError::Remote`] when the peer answered with an exception,
    /// [`WireError::ConnectionClosed`] when the connection ended first, and
    /// any codec or transport failure while sending.
    pub async fn call(
        &self,
        client: &Client<Message>,
        identifier: impl Into<Value>,
        signature: &MethodSignature,
        args: Vec<Value>,
    ) -> Result<Value> {
        let order = self.inner.send_order.lock().await;
        let (method_id, first_use) = self.methods().assign(signature);
        let id = self.inner.ids.next_id();

        let mut rpc = Rpc::with_id(id, method_id, identifier.into(), args);
        let released = std::mem::take(&mut *self.released());
        if !released.is_empty() {
            rpc.set_deleted_identifiers(released.clone());
        }

        let message: Message = if first_use {
            ExtendedRpc {
                rpc,
                serializable_method: self.inner.method_serializer.to_descriptor(signature),
            }
            .into()
        } else {
            rpc.into()
        };

        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);

        if let Err(e) = client.write_message(&message).await {
            self.pending().remove(&id);
            if first_use {
                // The peer never saw the descriptor.
                self.methods().by_signature.remove(signature);
            }
            if !released.is_empty() {
                let mut queue = self.released();
                let newer = std::mem::replace(&mut *queue, released);
                queue.extend(newer);
            }
            return Err(e);
        }
        drop(order);

        let reply = rx.await.map_err(|_| WireError::ConnectionClosed)?;
        if let Some(removed) = &reply.removed_identifiers {
            tracing::debug!("peer removed {} identifiers", removed.len());
        }
        Ok(reply.into_result()?)
    }

    /// Typed form of [`call`](Self::call): `args` is a tuple of the
    /// parameters (`()` for none) and the reply is decoded into `R`.
    pub async fn invoke<A, R>(
        &self,
        client: &Client<Message>,
        identifier: impl Into<Value>,
        signature: &MethodSignature,
        args: A,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let args = match rmpv::ext::to_value(&args)? {
            Value::Nil => Vec::new(),
            Value::Array(values) => values,
            single => vec![single],
        };
        let value = self.call(client, identifier, signature, args).await?;
        Ok(rmpv::ext::from_value(value)?)
    }

    /// Tell the peer, with the next call, that `identifier` is no longer
    /// referenced here.
    pub fn release(&self, identifier: impl Into<Value>) {
        self.released().push(identifier.into());
    }

    /// Method id assigned to `signature` on this connection, if any.
    pub fn method_id(&self, signature: &MethodSignature) -> Option<u32> {
        self.methods().by_signature.get(signature).copied()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending().len()
    }

    /// Forget method ids (reconnect) and fail every pending call.
    pub fn reset_state(&self) {
        *self.methods() = MethodIds::default();
        self.pending().clear();
    }

    fn complete(&self, reply: RpcResponse) {
        match self.pending().remove(&reply.id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::warn!("Reply {} matches no pending call", reply.id),
        }
    }

    fn methods(&self) -> MutexGuard<'_, MethodIds> {
        self.inner.methods.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<RpcResponse>>> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn released(&self) -> MutexGuard<'_, Vec<Value>> {
        self.inner.released.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Caller {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHandler<Message> for Caller {
    fn on_message(&self, client: Client<Message>, message: Message) -> BoxFuture<'static, ()> {
        match message {
            Message::Response(reply) => self.complete(reply),
            Message::Ack(ack) => tracing::debug!("ack {}", ack.id),
            call => match &self.inner.dispatcher {
                Some(dispatcher) => return dispatcher.on_message(client, call),
                None => tracing::warn!("Dropping unexpected {} {}", call.kind(), call.id()),
            },
        }
        Box::pin(async {})
    }

    fn on_disconnect(&self) {
        self.reset_state();
        if let Some(dispatcher) = &self.inner.dispatcher {
            dispatcher.on_disconnect();
        }
    }
}

/// Builder for [`Caller`].
pub struct CallerBuilder {
    ids: IdGenerator,
    method_serializer: Arc<dyn MethodSerializer>,
    dispatcher: Option<Dispatcher>,
}

impl CallerBuilder {
    /// Default: [`IdGenerator::global`]
    pub fn id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Must match the peer's. Default: [`NamedMethodSerializer`]
    pub fn method_serializer(mut self, serializer: Arc<dyn MethodSerializer>) -> Self {
        self.method_serializer = serializer;
        self
    }

    /// Serve calls arriving from the peer on the same connection.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Caller {
        Caller {
            inner: Arc::new(CallerInner {
                ids: self.ids,
                method_serializer: self.method_serializer,
                methods: Mutex::new(MethodIds::default()),
                pending: Mutex::new(HashMap::new()),
                released: Mutex::new(Vec::new()),
                send_order: tokio::sync::Mutex::new(()),
                dispatcher: self.dispatcher,
            }),
        }
    }
}
