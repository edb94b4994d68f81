//! Client engine: per-connection send and receive paths.
//!
//! Send path: [`Client::send`] queues a task on the connection's executor
//! which encodes the value and writes `[state?][data]` under the send lock,
//! so one pair is never split by another send.
//!
//! Receive path: [`Client::on_frame`] classifies each frame by its tag byte.
//! A STATE frame is stashed; the next DATA frame is paired with it, decoded
//! and handed to the [`MessageHandler`] on the executor.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use statewire::{ClientBuilder, Dispatcher, Message, ObjectRegistry};
//!
//! let registry = Arc::new(ObjectRegistry::new());
//! let connection = ClientBuilder::<Message>::new()
//!     .max_frame_size(1024 * 1024)
//!     .connect(stream, Arc::new(Dispatcher::new(registry)));
//!
//! connection.wait_for_shutdown().await?;
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use crate::codec::{DataStatePair, DefaultStatefulCodec, MessageType, Slice, StatefulCodec};
use crate::error::{Result, WireError};
use crate::executor::{BoxFuture, Executor, TokioExecutor};
use crate::protocol::{FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
use crate::transport::{spawn_writer_task, Transport, WriterConfig};

/// Reacts to fully decoded inbound messages.
pub trait MessageHandler<T>: Send + Sync + 'static {
    /// Handle one message. The returned future runs on the connection's
    /// executor; `client` is the connection it arrived on.
    fn on_message(&self, client: Client<T>, message: T) -> BoxFuture<'static, ()>;

    /// Called once when the read loop of the connection ends.
    fn on_disconnect(&self) {}
}

/// One side of a connection. Cheap to clone.
pub struct Client<T> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T> {
    codec: RwLock<Arc<dyn StatefulCodec<T>>>,
    transport: Arc<dyn Transport>,
    executor: Arc<dyn Executor>,
    handler: Arc<dyn MessageHandler<T>>,
    send_lock: tokio::sync::Mutex<()>,
    pending_state: Mutex<Option<Slice>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Client<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        codec: Arc<dyn StatefulCodec<T>>,
        transport: Arc<dyn Transport>,
        executor: Arc<dyn Executor>,
        handler: Arc<dyn MessageHandler<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                codec: RwLock::new(codec),
                transport,
                executor,
                handler,
                send_lock: tokio::sync::Mutex::new(()),
                pending_state: Mutex::new(None),
            }),
        }
    }

    /// Queue a message for sending. Failures go to the transport's
    /// exception handler, not back to the caller.
    pub fn send(&self, message: T) {
        let client = self.clone();
        self.execute(async move {
            if let Err(e) = client.write_message(&message).await {
                client.inner.transport.handle_exception(&e);
            }
        });
    }

    /// Encode and write one message now.
    ///
    /// Encoding happens under the send lock too, so the order in which the
    /// codec hands out state equals the order it reaches the wire.
    ///
    /// If a pair carrying state is not written in full, the codec forgets
    /// what it has told the peer so later messages describe their shapes
    /// again.
    pub async fn write_message(&self, message: &T) -> Result<()> {
        let _guard = self.inner.send_lock.lock().await;
        let codec = self.codec();
        let pair = codec.encode(message)?;

        let result = self.write_pair(&pair).await;
        if result.is_err() && pair.state.is_some() {
            tracing::debug!("State segment not delivered, discarding outbound codec state");
            codec.discard_outbound_state();
        }
        result
    }

    async fn write_pair(&self, pair: &DataStatePair) -> Result<()> {
        if let Some(state) = &pair.state {
            self.inner.transport.write(state.to_bytes()).await?;
        }
        self.inner.transport.write(pair.data.to_bytes()).await
    }

    /// Feed one complete inbound frame.
    ///
    /// # Errors
    ///
    /// Unknown tags and decode failures are fatal for the connection.
    pub fn on_frame(&self, frame: Bytes) -> Result<()> {
        let Some(&tag) = frame.first() else {
            return Ok(());
        };

        match MessageType::from_byte(tag) {
            Some(MessageType::State) => {
                let previous = self.pending_state().replace(Slice::whole(frame));
                if previous.is_some() {
                    tracing::warn!("State segment replaced before its data arrived");
                }
                Ok(())
            }
            Some(MessageType::Data) => {
                let state = self.pending_state().take();
                let pair = DataStatePair::new(Slice::whole(frame), state);

                // Decoded in arrival order so state is applied before any
                // later data that depends on it; only handling is deferred.
                let message = self.codec().decode(pair)?;
                let task = self.inner.handler.on_message(self.clone(), message);
                self.inner.executor.execute(task);
                Ok(())
            }
            None => Err(WireError::Protocol(format!(
                "Unknown segment tag 0x{:02x}",
                tag
            ))),
        }
    }

    /// Run a task on this connection's executor.
    pub fn execute<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.executor.execute(Box::pin(task));
    }

    /// The active codec.
    pub fn codec(&self) -> Arc<dyn StatefulCodec<T>> {
        self.inner
            .codec
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the codec, e.g. to wrap it in a [`CipherCodec`](crate::codec::CipherCodec).
    pub fn set_codec(&self, codec: Arc<dyn StatefulCodec<T>>) {
        *self.inner.codec.write().unwrap_or_else(|e| e.into_inner()) = codec;
    }

    /// Forget codec state and any half-received pair (reconnect).
    pub fn reset_state(&self) {
        self.pending_state().take();
        self.codec().reset_state();
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    fn pending_state(&self) -> std::sync::MutexGuard<'_, Option<Slice>> {
        self.inner
            .pending_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Main read loop - splits the stream into frames and feeds them in.
    pub async fn read_loop<R>(&self, mut reader: R, max_frame_size: u32) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frame_buffer = FrameBuffer::with_max_frame_size(max_frame_size);
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(WireError::Io(e)),
            };

            for frame in frame_buffer.push(&buf[..n])? {
                self.on_frame(frame)?;
            }
        }
    }
}

/// Builder for wiring a [`Client`] onto a byte stream.
pub struct ClientBuilder<T> {
    codec: Option<Arc<dyn StatefulCodec<T>>>,
    executor: Option<Arc<dyn Executor>>,
    writer_config: WriterConfig,
    max_frame_size: u32,
}

impl<T> ClientBuilder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            codec: None,
            executor: None,
            writer_config: WriterConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Codec to use. Default: [`DefaultStatefulCodec`].
    pub fn codec(mut self, codec: Arc<dyn StatefulCodec<T>>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Execution context for send and handling tasks.
    /// Default: [`TokioExecutor`] on the current runtime.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Largest accepted inbound frame. Default: 16 MiB.
    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_frames = limit;
        self
    }

    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Split `stream`, spawn its writer task and read loop, and return the
    /// running connection. Must be called inside a Tokio runtime.
    pub fn connect<S>(self, stream: S, handler: Arc<dyn MessageHandler<T>>) -> Connection<T>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, self.writer_config);

        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(DefaultStatefulCodec::<T>::new()));
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(TokioExecutor::current()));

        let client = Client::new(codec, Arc::new(writer), executor, handler.clone());

        let read_client = client.clone();
        let max_frame_size = self.max_frame_size;
        let reader_task = tokio::spawn(async move {
            let result = read_client.read_loop(reader, max_frame_size).await;
            if let Err(e) = &result {
                tracing::error!("Read loop error: {}", e);
            }
            handler.on_disconnect();
            result
        });

        Connection {
            client,
            reader_task,
            _writer_task: writer_task,
        }
    }
}

impl<T> Default for ClientBuilder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A running connection.
pub struct Connection<T> {
    client: Client<T>,
    reader_task: JoinHandle<Result<()>>,
    _writer_task: JoinHandle<Result<()>>,
}

impl<T> Connection<T> {
    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    /// Stop reading; pending handlers still run to completion.
    pub fn close(&self) {
        self.reader_task.abort();
    }

    /// Wait until the peer closes the stream or the read loop fails.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        match self.reader_task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(WireError::Protocol(format!("read loop panicked: {}", e))),
        }
    }
}
