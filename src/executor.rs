//! Execution contexts for send and receive tasks.
//!
//! A connection hands every send and every message-handling task to an
//! [`Executor`]. Two flavours cover the interesting cases:
//!
//! - [`TokioExecutor`] spawns each task on the runtime, so handling of
//!   distinct messages may complete in any order.
//! - [`SerialExecutor`] runs tasks one at a time in submission order.

use std::future::Future;
use std::pin::Pin;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Boxed future for executor tasks and handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Caller-supplied execution context.
pub trait Executor: Send + Sync + 'static {
    /// Schedule a task. Must not block the caller.
    fn execute(&self, task: BoxFuture<'static, ()>);
}

/// Multi-worker executor: one runtime task per submitted task.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Executor bound to the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: BoxFuture<'static, ()>) {
        self.handle.spawn(task);
    }
}

/// Strictly ordered executor: a single drain task runs submissions in order,
/// each to completion before the next starts.
#[derive(Debug, Clone)]
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl SerialExecutor {
    /// Spawn the drain task on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
            }
        });
        Self { tx }
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, task: BoxFuture<'static, ()>) {
        if self.tx.send(task).is_err() {
            tracing::warn!("Serial executor stopped, dropping task");
        }
    }
}
