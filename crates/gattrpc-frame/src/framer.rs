use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use gattrpc_transport::{ChannelIo, WriteMode};

use crate::codec::{is_no_data, split_message, Chunk, DEFAULT_MTU};
use crate::error::{FrameError, Result};
use crate::flags::ChunkFlags;
use crate::queue::SerialQueue;

/// Default cap on a reassembled response: 64 KiB.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 64 * 1024;

/// Configuration for a [`ChunkFramer`].
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Link MTU in bytes, header included. Default: 244.
    pub mtu: usize,
    /// Pause before retrying an empty first read. Default: 100 ms.
    pub empty_read_backoff: Duration,
    /// How many times a message is resent after `MISSED_CHUNKS`. Default: 1.
    pub max_resends: u32,
    /// Maximum reassembled response size in bytes. Default: 64 KiB.
    pub max_response_size: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            empty_read_backoff: Duration::from_millis(100),
            max_resends: 1,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

/// Anything that can exchange one request message for one response message.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, message: &[u8]) -> Result<Bytes>;
}

enum Response {
    Complete(Bytes),
    MissedChunks,
}

/// Client side of the chunked request/response exchange over one channel.
pub struct ChunkFramer<C: ?Sized> {
    io: Arc<C>,
    config: FramerConfig,
    message_id: AtomicU8,
    queue: SerialQueue,
}

impl<C: ChannelIo + ?Sized> ChunkFramer<C> {
    /// Create a framer with default configuration.
    pub fn new(io: Arc<C>) -> Self {
        Self::with_config(io, FramerConfig::default())
    }

    /// Create a framer with explicit configuration.
    pub fn with_config(io: Arc<C>, config: FramerConfig) -> Self {
        Self {
            io,
            config,
            message_id: AtomicU8::new(0),
            queue: SerialQueue::new(),
        }
    }

    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    /// The id used by the most recent transmission (0 before the first).
    pub fn last_message_id(&self) -> u8 {
        self.message_id.load(Ordering::Acquire)
    }

    /// Send `message` and return the reassembled response.
    ///
    /// Exchanges on one framer never interleave: concurrent callers wait
    /// their turn in submission order.
    pub async fn send(&self, message: &[u8]) -> Result<Bytes> {
        self.queue.run(self.exchange(message)).await
    }

    async fn exchange(&self, message: &[u8]) -> Result<Bytes> {
        let mut transmissions = 0u32;
        loop {
            let message_id = self.next_message_id();
            let chunks = split_message(message_id, message, self.config.mtu)?;
            transmissions += 1;
            tracing::debug!(
                message_id,
                chunks = chunks.len(),
                size = message.len(),
                "sending message"
            );

            self.write_chunks(&chunks).await?;

            match self.read_response().await? {
                Response::Complete(body) => {
                    tracing::debug!(message_id, size = body.len(), "received response");
                    return Ok(body);
                }
                Response::MissedChunks if transmissions > self.config.max_resends => {
                    return Err(FrameError::MissedChunks {
                        attempts: transmissions,
                    });
                }
                Response::MissedChunks => {
                    tracing::warn!(message_id, "device missed chunks, resending message");
                }
            }
        }
    }

    fn next_message_id(&self) -> u8 {
        self.message_id
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    async fn write_chunks(&self, chunks: &[Bytes]) -> Result<()> {
        let last = chunks.len().saturating_sub(1);
        for (index, chunk) in chunks.iter().enumerate() {
            let mode = if index == last {
                WriteMode::WithResponse
            } else {
                WriteMode::WithoutResponse
            };
            self.io.write(chunk, mode).await?;
        }
        Ok(())
    }

    async fn read_first(&self) -> Result<Bytes> {
        let wire = self.io.read().await?;
        if !is_no_data(&wire) {
            return Ok(wire);
        }

        tracing::debug!(
            backoff = ?self.config.empty_read_backoff,
            "empty response, retrying once"
        );
        tokio::time::sleep(self.config.empty_read_backoff).await;

        let wire = self.io.read().await?;
        if is_no_data(&wire) {
            return Err(FrameError::EmptyResponse);
        }
        Ok(wire)
    }

    async fn read_response(&self) -> Result<Response> {
        let mut chunk = Chunk::decode(self.read_first().await?).ok_or(FrameError::EmptyResponse)?;

        if chunk.header.flags.contains(ChunkFlags::SIZE_OVERFLOW) {
            return Err(FrameError::SizeOverflow);
        }
        if chunk.header.flags.contains(ChunkFlags::MISSED_CHUNKS) {
            return Ok(Response::MissedChunks);
        }

        let mut body = BytesMut::new();
        let mut expected = 0u16;
        loop {
            if chunk.header.sequence != expected {
                return Err(FrameError::OutOfSequence {
                    expected,
                    got: chunk.header.sequence,
                });
            }

            let size = body.len() + chunk.payload.len();
            if size > self.config.max_response_size {
                return Err(FrameError::ResponseTooLarge {
                    size,
                    max: self.config.max_response_size,
                });
            }
            body.extend_from_slice(&chunk.payload);

            if chunk.header.flags.is_final() {
                return Ok(Response::Complete(body.freeze()));
            }

            expected = expected.wrapping_add(1);
            chunk = Chunk::decode(self.io.read().await?).ok_or(FrameError::EmptyContinuation)?;
        }
    }
}

#[async_trait]
impl<C: ChannelIo + ?Sized> MessageTransport for ChunkFramer<C> {
    async fn send(&self, message: &[u8]) -> Result<Bytes> {
        ChunkFramer::send(self, message).await
    }
}

impl<C: ?Sized> std::fmt::Debug for ChunkFramer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkFramer")
            .field("config", &self.config)
            .field("message_id", &self.message_id.load(Ordering::Relaxed))
            .finish()
    }
}
