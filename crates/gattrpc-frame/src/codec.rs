use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::flags::ChunkFlags;

/// Chunk header: message id (1) + sequence (2) + flags (1) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Default link MTU: the largest packet a characteristic write carries.
pub const DEFAULT_MTU: usize = 244;

/// Header prefixed to every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Transmission id shared by all chunks of one message.
    pub message_id: u8,
    /// Position of the chunk within the message, starting at 0.
    pub sequence: u16,
    /// Chunk flags.
    pub flags: ChunkFlags,
}

impl ChunkHeader {
    pub fn new(message_id: u8, sequence: u16, flags: ChunkFlags) -> Self {
        Self {
            message_id,
            sequence,
            flags,
        }
    }

    /// Encode the header into `dst`.
    ///
    /// Wire format:
    /// ```text
    /// ┌────────────┬───────────────┬──────────┬──────────────────┐
    /// │ Message id │ Sequence      │ Flags    │ Payload          │
    /// │ (1B)       │ (2B LE)       │ (1B)     │ (<= MTU - 4)     │
    /// └────────────┴───────────────┴──────────┴──────────────────┘
    /// ```
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.message_id);
        dst.put_u16_le(self.sequence);
        dst.put_u8(self.flags.bits());
    }

    /// Decode a header from the start of `src`.
    ///
    /// Returns `None` if `src` is shorter than a header.
    pub fn decode(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            message_id: src[0],
            sequence: u16::from_le_bytes([src[1], src[2]]),
            flags: ChunkFlags::from_bits(src[3]),
        })
    }
}

/// One framed fragment of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(header: ChunkHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Split a received packet into header and payload.
    ///
    /// Returns `None` for "no data" packets (shorter than a header).
    pub fn decode(mut wire: Bytes) -> Option<Self> {
        let header = ChunkHeader::decode(&wire)?;
        let payload = wire.split_off(HEADER_SIZE);
        Some(Self { header, payload })
    }

    /// Encode the chunk into a single packet.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.header.encode(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// The total wire size of this chunk (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Whether a received packet is the device's "nothing queued" answer.
pub fn is_no_data(wire: &[u8]) -> bool {
    wire.len() < HEADER_SIZE
}

/// Payload bytes available per chunk for a given MTU.
pub fn payload_capacity(mtu: usize) -> Result<usize> {
    if mtu <= HEADER_SIZE {
        return Err(FrameError::InvalidMtu(mtu));
    }
    Ok(mtu - HEADER_SIZE)
}

/// Split `message` into encoded chunks tagged with `message_id`.
///
/// Sequence numbers are contiguous from 0 and only the last chunk carries
/// `FINAL`. An empty message becomes a single header-only `FINAL` chunk.
pub fn split_message(message_id: u8, message: &[u8], mtu: usize) -> Result<Vec<Bytes>> {
    let capacity = payload_capacity(mtu)?;
    let max_chunks = usize::from(u16::MAX) + 1;
    let count = message.len().div_ceil(capacity).max(1);
    if count > max_chunks {
        return Err(FrameError::PayloadTooLarge {
            size: message.len(),
            max: capacity * max_chunks,
        });
    }

    let mut chunks = Vec::with_capacity(count);
    for index in 0..count {
        let start = index * capacity;
        let end = (start + capacity).min(message.len());
        let flags = if index + 1 == count {
            ChunkFlags::FINAL
        } else {
            ChunkFlags::NONE
        };

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + end - start);
        // `count <= u16::MAX + 1`, so every index fits.
        ChunkHeader::new(message_id, index as u16, flags).encode(&mut buf);
        buf.put_slice(&message[start..end]);
        chunks.push(buf.freeze());
    }
    Ok(chunks)
}

/// Reassemble a complete chunk stream into one message.
///
/// The stream must share one message id, number its chunks contiguously from
/// 0 and end with exactly one `FINAL` chunk.
pub fn reassemble<B: AsRef<[u8]>>(chunks: &[B]) -> Result<Bytes> {
    let mut out = BytesMut::new();
    let mut message_id = None;

    for (index, wire) in chunks.iter().enumerate() {
        let wire = wire.as_ref();
        let header = ChunkHeader::decode(wire)
            .ok_or_else(|| FrameError::Malformed(format!("chunk {index} is shorter than a header")))?;

        match message_id {
            None => message_id = Some(header.message_id),
            Some(id) if id != header.message_id => {
                return Err(FrameError::Malformed(format!(
                    "mixed message ids ({id} and {})",
                    header.message_id
                )));
            }
            Some(_) => {}
        }

        if usize::from(header.sequence) != index {
            return Err(FrameError::OutOfSequence {
                expected: index as u16,
                got: header.sequence,
            });
        }

        let last = index + 1 == chunks.len();
        if header.flags.is_final() != last {
            return Err(FrameError::Malformed(if last {
                "stream does not end with FINAL".to_string()
            } else {
                format!("FINAL on chunk {index} before end of stream")
            }));
        }

        out.put_slice(&wire[HEADER_SIZE..]);
    }

    if message_id.is_none() {
        return Err(FrameError::Malformed("empty chunk stream".to_string()));
    }
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(chunks: &[Bytes]) -> Vec<ChunkHeader> {
        chunks
            .iter()
            .map(|c| ChunkHeader::decode(c).unwrap())
            .collect()
    }

    #[test]
    fn header_wire_layout() {
        let mut buf = BytesMut::new();
        ChunkHeader::new(7, 0x0102, ChunkFlags::FINAL).encode(&mut buf);
        assert_eq!(buf.as_ref(), &[7, 0x02, 0x01, 0x01]);
    }

    #[test]
    fn decode_short_packet_is_none() {
        assert!(ChunkHeader::decode(&[0]).is_none());
        assert!(Chunk::decode(Bytes::from_static(&[1, 2, 3])).is_none());
        assert!(is_no_data(&[0]));
        assert!(!is_no_data(&[1, 0, 0, 1]));
    }

    #[test]
    fn six_hundred_bytes_make_three_chunks() {
        let message = vec![0x5A; 600];
        let chunks = split_message(1, &message, DEFAULT_MTU).unwrap();

        assert_eq!(chunks.len(), 3);
        let hdrs = headers(&chunks);
        assert_eq!(
            hdrs.iter().map(|h| h.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            hdrs.iter().map(|h| h.flags.bits()).collect::<Vec<_>>(),
            vec![0, 0, ChunkFlags::FINAL.bits()]
        );
        assert!(hdrs.iter().all(|h| h.message_id == 1));
        assert_eq!(chunks[0].len(), DEFAULT_MTU);
        assert_eq!(chunks[2].len(), HEADER_SIZE + 120);
    }

    #[test]
    fn boundary_lengths_round_trip() {
        let capacity = DEFAULT_MTU - HEADER_SIZE;
        for (len, expected_chunks) in [(0, 1), (1, 1), (capacity, 1), (capacity + 1, 2)] {
            let message: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let chunks = split_message(9, &message, DEFAULT_MTU).unwrap();
            assert_eq!(chunks.len(), expected_chunks, "length {len}");
            assert_eq!(
                headers(&chunks).iter().filter(|h| h.flags.is_final()).count(),
                1
            );
            assert_eq!(reassemble(&chunks).unwrap().as_ref(), message.as_slice());
        }
    }

    #[test]
    fn empty_message_is_header_only_final_chunk() {
        let chunks = split_message(3, b"", DEFAULT_MTU).unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(&[3, 0, 0, 0x01])]);
    }

    #[test]
    fn invalid_mtu_rejected() {
        assert!(matches!(
            split_message(0, b"abc", HEADER_SIZE),
            Err(FrameError::InvalidMtu(4))
        ));
    }

    #[test]
    fn message_too_large_for_sequence_space() {
        let message = vec![0u8; usize::from(u16::MAX) + 2];
        let result = split_message(0, &message, HEADER_SIZE + 1);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn reassemble_rejects_gaps_and_mixed_ids() {
        let chunks = split_message(1, &[0u8; 500], DEFAULT_MTU).unwrap();
        let gap = vec![chunks[0].clone(), chunks[2].clone()];
        assert!(matches!(
            reassemble(&gap),
            Err(FrameError::OutOfSequence { expected: 1, got: 2 })
        ));

        let other = split_message(2, &[0u8; 500], DEFAULT_MTU).unwrap();
        let mixed = vec![chunks[0].clone(), other[1].clone(), other[2].clone()];
        assert!(matches!(reassemble(&mixed), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn reassemble_requires_single_trailing_final() {
        let chunks = split_message(1, &[0u8; 300], DEFAULT_MTU).unwrap();
        assert!(matches!(
            reassemble(&chunks[..1]),
            Err(FrameError::Malformed(_))
        ));
        let empty: [Bytes; 0] = [];
        assert!(matches!(reassemble(&empty), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn chunk_decode_strips_header() {
        let chunk = Chunk::decode(Bytes::from_static(&[4, 1, 0, 0, b'h', b'i'])).unwrap();
        assert_eq!(chunk.header, ChunkHeader::new(4, 1, ChunkFlags::NONE));
        assert_eq!(chunk.payload.as_ref(), b"hi");
        assert_eq!(chunk.wire_size(), 6);
        assert_eq!(chunk.encode().as_ref(), &[4, 1, 0, 0, b'h', b'i']);
    }
}
