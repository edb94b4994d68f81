//! Dispatch module - the serving side of the call protocol.
//!
//! Provides:
//! - [`Dispatcher`] - a [`MessageHandler`] that binds method ids, invokes
//!   targets and replies
//! - [`MethodBindings`] - the per-connection `method id -> signature` table
//! - [`Service`] / [`ServiceBuilder`] - typed async method tables
//! - [`ObjectResolver`] / [`ObjectRegistry`] - identifier to target lookup
//! - [`MethodSerializer`] / [`NamedMethodSerializer`] - method descriptors
//! - [`ExecutionContext`] - what a context-aware method gets to see
//!
//! Every failure while serving a call becomes the `exception` of the reply.
//! Only codec and transport failures can hurt the connection.
//!
//! # Example
//!
//! ```ignore
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use statewire::{ClientBuilder, Dispatcher, Message, ObjectRegistry, Service};
//!
//! let registry = Arc::new(ObjectRegistry::new());
//! registry.register(
//!     "calc",
//!     Arc::new(
//!         Service::builder("calc")
//!             .method("sum", &["i64", "i64"], |(a, b): (i64, i64)| async move {
//!                 Ok::<_, Infallible>(a + b)
//!             })
//!             .build(),
//!     ),
//! );
//!
//! let dispatcher = Dispatcher::new(registry);
//! let connection = ClientBuilder::<Message>::new().connect(stream, Arc::new(dispatcher));
//! ```

mod binding;
pub(crate) mod context;
mod resolver;
mod service;
mod signature;

pub use binding::MethodBindings;
pub use context::ExecutionContext;
pub use resolver::{ObjectRegistry, ObjectResolver};
pub use service::{InvokeResult, Method, Service, ServiceBuilder, Target, TypedMethod};
pub use signature::{MethodSerializer, MethodSignature, NamedMethodSerializer};

use std::sync::Arc;
use std::time::Duration;

use rmpv::Value;

use crate::client::{Client, MessageHandler};
use crate::error::InvocationError;
use crate::executor::BoxFuture;
use crate::protocol::{Message, Rpc, RpcResponse};

/// Default interval between cache re-checks while waiting for a binding.
pub const DEFAULT_BINDING_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default limit on waiting for a binding.
pub const DEFAULT_BINDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Interval between cache re-checks while waiting for a binding.
    pub binding_poll_interval: Duration,
    /// How long an `Rpc` may wait for its `ExtendedRpc`. `None` waits forever.
    pub binding_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            binding_poll_interval: DEFAULT_BINDING_POLL_INTERVAL,
            binding_timeout: Some(DEFAULT_BINDING_TIMEOUT),
        }
    }
}

/// Serving side of one connection. Cheap to clone.
///
/// Method bindings are per connection: use one dispatcher per connection
/// and share the resolver between them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    resolver: Arc<dyn ObjectResolver>,
    method_serializer: Arc<dyn MethodSerializer>,
    bindings: MethodBindings,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Dispatcher with [`NamedMethodSerializer`] and default configuration.
    pub fn new(resolver: Arc<dyn ObjectResolver>) -> Self {
        Self::builder(resolver).build()
    }

    pub fn builder(resolver: Arc<dyn ObjectResolver>) -> DispatcherBuilder {
        DispatcherBuilder {
            resolver,
            method_serializer: Arc::new(NamedMethodSerializer),
            config: DispatcherConfig::default(),
        }
    }

    pub fn bindings(&self) -> &MethodBindings {
        &self.inner.bindings
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Forget all method bindings (reconnect).
    pub fn reset_state(&self) {
        self.inner.bindings.clear();
    }

    /// Serve one call and build its reply. Never fails: every problem ends
    /// up in the reply's `exception`.
    pub async fn handle_call(
        &self,
        client: &Client<Message>,
        mut rpc: Rpc,
        descriptor: Option<Value>,
    ) -> RpcResponse {
        let ctx = ExecutionContext::new(client.clone(), &rpc);
        let deleted = rpc.deleted_identifiers.take();
        let id = rpc.id;

        let result = self.invoke(&ctx, rpc, descriptor).await;

        if let Some(deleted) = deleted {
            self.inner.resolver.release(&deleted, &ctx);
        }

        match result {
            Ok(value) => RpcResponse::ok(id, value),
            Err(e) => {
                tracing::debug!("call {} failed: {}", id, e);
                RpcResponse::err(id, e)
            }
        }
    }

    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        rpc: Rpc,
        descriptor: Option<Value>,
    ) -> Result<Value, InvocationError> {
        let inner = &self.inner;

        // Bound before the target lookup so a bad identifier on the first
        // call does not leave later calls for this id waiting.
        let signature = match descriptor {
            Some(descriptor) => {
                let signature = inner.method_serializer.from_descriptor(&descriptor)?;
                inner.bindings.bind(rpc.method_id, signature)
            }
            None => {
                inner
                    .bindings
                    .wait_for(
                        rpc.method_id,
                        inner.config.binding_poll_interval,
                        inner.config.binding_timeout,
                    )
                    .await?
            }
        };

        let target = inner.resolver.resolve(&rpc.identifier, ctx)?;
        tracing::debug!("responding to {} on {}", signature, rpc.identifier);

        let call = target.invoke(ctx.clone(), &signature, rpc.args);
        match tokio::spawn(call).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(InvocationError::Failed(panic_message(e.into_panic()))),
            Err(e) => Err(InvocationError::Failed(e.to_string())),
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

impl MessageHandler<Message> for Dispatcher {
    fn on_message(&self, client: Client<Message>, message: Message) -> BoxFuture<'static, ()> {
        let (rpc, descriptor) = match message {
            Message::Rpc(rpc) => (rpc, None),
            Message::ExtendedRpc(ext) => (ext.rpc, Some(ext.serializable_method)),
            other => {
                tracing::warn!("Dropping unexpected {} {}", other.kind(), other.id());
                return Box::pin(async {});
            }
        };

        let dispatcher = self.clone();
        Box::pin(async move {
            let reply = dispatcher.handle_call(&client, rpc, descriptor).await;
            client.send(reply.into());
        })
    }

    fn on_disconnect(&self) {
        self.reset_state();
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    resolver: Arc<dyn ObjectResolver>,
    method_serializer: Arc<dyn MethodSerializer>,
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Default: [`NamedMethodSerializer`]
    pub fn method_serializer(mut self, serializer: Arc<dyn MethodSerializer>) -> Self {
        self.method_serializer = serializer;
        self
    }

    /// Default: 1 second
    pub fn binding_poll_interval(mut self, interval: Duration) -> Self {
        self.config.binding_poll_interval = interval;
        self
    }

    /// Default: 30 seconds. `None` waits forever.
    pub fn binding_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.binding_timeout = timeout;
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            inner: Arc::new(DispatcherInner {
                resolver: self.resolver,
                method_serializer: self.method_serializer,
                bindings: MethodBindings::new(),
                config: self.config,
            }),
        }
    }
}
