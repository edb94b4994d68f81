//! # statewire
//!
//! Stateful binary RPC over any ordered byte stream.
//!
//! Messages are encoded by a [`StatefulCodec`](codec::StatefulCodec) that
//! only tells the peer about a message shape the first time it is used, and
//! may be wrapped in a [`CipherCodec`](codec::CipherCodec). Calls bind a
//! compact method id to a full method descriptor on first use, so repeated
//! calls stay small.
//!
//! ## Architecture
//!
//! - **Codec**: `[STATE][DATA]` segment pairs, shape dictionary, sealed boxes
//! - **Client**: per-connection send lock and state/data pairing
//! - **Dispatcher**: method binding, target resolution, invocation, replies
//! - **Caller**: first-use binding, reply correlation, release hints
//!
//! ## Example
//!
//! ```ignore
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use statewire::{
//!     Caller, ClientBuilder, Dispatcher, Message, MethodSignature, ObjectRegistry, Service,
//! };
//!
//! #[tokio::main]
//! async fn main() -> statewire::Result<()> {
//!     let (left, right) = tokio::io::duplex(64 * 1024);
//!
//!     let registry = Arc::new(ObjectRegistry::new());
//!     registry.register(
//!         "calc",
//!         Arc::new(
//!             Service::builder("calc")
//!                 .method("sum", &["i64", "i64"], |(a, b): (i64, i64)| async move {
//!                     Ok::<_, Infallible>(a + b)
//!                 })
//!                 .build(),
//!         ),
//!     );
//!     let _server = ClientBuilder::<Message>::new().connect(right, Arc::new(Dispatcher::new(registry)));
//!
//!     let caller = Caller::new();
//!     let connection = ClientBuilder::<Message>::new().connect(left, Arc::new(caller.clone()));
//!
//!     let sum = MethodSignature::new("sum", ["i64", "i64"]);
//!     let five: i64 = caller.invoke(connection.client(), "calc", &sum, (2, 3)).await?;
//!     assert_eq!(five, 5);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod transport;

mod caller;
mod client;

pub use caller::{Caller, CallerBuilder};
pub use client::{Client, ClientBuilder, Connection, MessageHandler};
pub use dispatch::{
    Dispatcher, DispatcherBuilder, DispatcherConfig, ExecutionContext, MethodSignature,
    ObjectRegistry, ObjectResolver, Service, Target,
};
pub use error::{InvocationError, Result, WireError};
pub use executor::{Executor, SerialExecutor, TokioExecutor};
pub use protocol::Message;
