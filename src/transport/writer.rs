//! Dedicated writer task for the outbound half of a connection.
//!
//! ```text
//! Client::send ─┐
//! Client::send ─┼─► WriterHandle ─► mpsc ─► writer task ─► AsyncWrite
//! Client::send ─┘     (permits)
//! ```
//!
//! Each queued frame holds one permit of a semaphore sized to
//! `max_pending_frames`; the permit is returned once the frame has been
//! flushed. Queue order is write order, so the state and data segments a
//! client queues back to back under its send lock stay adjacent.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use super::Transport;
use crate::error::{Result, WireError};
use crate::executor::BoxFuture;

/// Default limit on frames queued but not yet flushed.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default capacity of the queue feeding the writer task.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default wait for a free slot before a send fails.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames gathered into one vectored write at most.
const MAX_FRAMES_PER_WRITE: usize = 64;

/// Settings for the writer task and its queue.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Frames queued but not yet flushed before senders have to wait.
    pub max_pending_frames: usize,
    /// Capacity of the channel to the writer task.
    pub channel_capacity: usize,
    /// How long a sender waits for a slot before giving up.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// A segment waiting for the writer task.
#[derive(Debug)]
struct QueuedFrame {
    segment: Bytes,
    _slot: OwnedSemaphorePermit,
}

/// Queues frames on the writer task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<QueuedFrame>,
    slots: Arc<Semaphore>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue one segment; its length prefix is added by the writer task.
    ///
    /// # Errors
    ///
    /// [`WireError::BackpressureTimeout`] when no slot frees up in time,
    /// [`WireError::ConnectionClosed`] when the writer task is gone.
    pub async fn send(&self, segment: Bytes) -> Result<()> {
        let slot = match tokio::time::timeout(self.timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(slot)) => slot,
            Ok(Err(_)) => return Err(WireError::ConnectionClosed),
            Err(_) => {
                tracing::warn!("Writer queue full for {:?}", self.timeout);
                return Err(WireError::BackpressureTimeout);
            }
        };

        self.tx
            .send(QueuedFrame {
                segment,
                _slot: slot,
            })
            .await
            .map_err(|_| WireError::ConnectionClosed)
    }

    /// All slots are taken; the next send will wait.
    pub fn is_backpressure_active(&self) -> bool {
        self.slots.available_permits() == 0
    }

    /// Frames queued but not yet flushed.
    pub fn pending_count(&self) -> usize {
        self.max_pending - self.slots.available_permits()
    }
}

impl Transport for WriterHandle {
    fn write(&self, frame: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.send(frame))
    }
}

/// Spawn the writer task over `writer`.
///
/// The task ends, shutting `writer` down, once every handle is dropped; it
/// ends early with the first I/O error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let max_pending = config.max_pending_frames.max(1);

    let handle = WriterHandle {
        tx,
        slots: Arc::new(Semaphore::new(max_pending)),
        max_pending,
        timeout: config.backpressure_timeout,
    };

    (handle, tokio::spawn(run_writer(rx, writer)))
}

async fn run_writer<W>(mut rx: mpsc::Receiver<QueuedFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_FRAMES_PER_WRITE);
    while rx.recv_many(&mut batch, MAX_FRAMES_PER_WRITE).await > 0 {
        let result = write_frames(&mut writer, &batch).await;
        // Releases the slots.
        batch.clear();
        if let Err(e) = result {
            tracing::error!("Writer task stopped: {}", e);
            return Err(e);
        }
    }

    tracing::debug!("All writer handles dropped, shutting down");
    writer.shutdown().await?;
    Ok(())
}

/// Write `[len][segment]` for every frame, resuming after short writes.
async fn write_frames<W>(writer: &mut W, frames: &[QueuedFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut chunks: VecDeque<Bytes> = VecDeque::with_capacity(frames.len() * 2);
    for frame in frames {
        let length = (frame.segment.len() as u32).to_be_bytes();
        chunks.push_back(Bytes::copy_from_slice(&length));
        if !frame.segment.is_empty() {
            chunks.push_back(frame.segment.clone());
        }
    }

    while !chunks.is_empty() {
        let written = {
            let slices: Vec<IoSlice<'_>> = chunks.iter().map(|c| IoSlice::new(c)).collect();
            writer.write_vectored(&slices).await?
        };
        if written == 0 {
            return Err(WireError::Io(std::io::ErrorKind::WriteZero.into()));
        }
        consume(&mut chunks, written);
    }

    writer.flush().await?;
    Ok(())
}

/// Drop the first `n` bytes from the front of `chunks`.
fn consume(chunks: &mut VecDeque<Bytes>, mut n: usize) {
    while n > 0 {
        let Some(front) = chunks.front_mut() else {
            return;
        };
        if n < front.len() {
            front.advance(n);
            return;
        }
        n -= front.len();
        chunks.pop_front();
    }
}
