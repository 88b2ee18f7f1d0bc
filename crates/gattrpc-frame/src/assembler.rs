use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::codec::{split_message, Chunk, ChunkHeader};
use crate::error::Result;
use crate::flags::ChunkFlags;

/// The packet served when no response chunk is queued.
pub const NO_DATA: &[u8] = &[0];

/// Outcome of feeding one chunk to a [`ChunkAssembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// More chunks are needed (or the chunk was ignored).
    Pending,
    /// A complete message. The caller should queue a reply with
    /// [`ChunkAssembler::respond`].
    Message(Bytes),
    /// The message was rejected and an error reply carrying these flags
    /// (plus `FINAL`) has been queued.
    Rejected(ChunkFlags),
}

/// Device-side reassembly of inbound chunks and chunking of replies.
///
/// A chunk with a new message id starts a new message. A chunk out of
/// sequence queues a `MISSED_CHUNKS` reply, a message larger than the buffer
/// queues `SIZE_OVERFLOW`; in both cases the remaining chunks of that message
/// are ignored.
#[derive(Debug)]
pub struct ChunkAssembler {
    mtu: usize,
    max_message_size: usize,
    message_id: Option<u8>,
    expected: u16,
    buffer: BytesMut,
    discarding: bool,
    responses: VecDeque<Bytes>,
}

impl ChunkAssembler {
    pub fn new(mtu: usize, max_message_size: usize) -> Self {
        Self {
            mtu,
            max_message_size,
            message_id: None,
            expected: 0,
            buffer: BytesMut::new(),
            discarding: false,
            responses: VecDeque::new(),
        }
    }

    /// Feed one received packet.
    pub fn consume(&mut self, wire: &[u8]) -> Assembled {
        let Some(chunk) = Chunk::decode(Bytes::copy_from_slice(wire)) else {
            tracing::debug!(len = wire.len(), "ignoring runt chunk");
            return Assembled::Pending;
        };
        let header = chunk.header;

        if self.message_id != Some(header.message_id) {
            self.reset(header.message_id);
        }
        if self.discarding {
            return Assembled::Pending;
        }

        if header.sequence != self.expected {
            tracing::debug!(
                message_id = header.message_id,
                expected = self.expected,
                got = header.sequence,
                "missed chunk"
            );
            return self.reject(ChunkFlags::MISSED_CHUNKS);
        }
        self.expected = self.expected.wrapping_add(1);

        if self.buffer.len() + chunk.payload.len() > self.max_message_size {
            tracing::debug!(
                message_id = header.message_id,
                max = self.max_message_size,
                "message exceeds buffer"
            );
            return self.reject(ChunkFlags::SIZE_OVERFLOW);
        }
        self.buffer.extend_from_slice(&chunk.payload);

        if header.flags.is_final() {
            self.discarding = true;
            return Assembled::Message(self.buffer.split().freeze());
        }
        Assembled::Pending
    }

    /// Queue `message` as the reply to the current message.
    pub fn respond(&mut self, message: &[u8]) -> Result<()> {
        let id = self.message_id.unwrap_or(0);
        self.responses = split_message(id, message, self.mtu)?.into();
        Ok(())
    }

    /// Next reply chunk, or [`NO_DATA`] when nothing is queued.
    pub fn next_response(&mut self) -> Bytes {
        self.responses
            .pop_front()
            .unwrap_or_else(|| Bytes::from_static(NO_DATA))
    }

    /// Number of reply chunks still queued.
    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    fn reset(&mut self, message_id: u8) {
        self.message_id = Some(message_id);
        self.expected = 0;
        self.buffer.clear();
        self.discarding = false;
        self.responses.clear();
    }

    fn reject(&mut self, flags: ChunkFlags) -> Assembled {
        self.discarding = true;
        self.buffer.clear();
        let header = ChunkHeader::new(self.message_id.unwrap_or(0), 0, flags | ChunkFlags::FINAL);
        self.responses = VecDeque::from([Chunk::new(header, Bytes::new()).encode()]);
        Assembled::Rejected(flags)
    }
}
