use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use gattrpc_frame::{
    reassemble, split_message, Assembled, ChunkAssembler, ChunkFramer, ChunkHeader, FrameError,
    FramerConfig, DEFAULT_MTU,
};
use gattrpc_transport::{ChannelIo, WriteMode};
use proptest::prelude::*;

/// A device that reverses every message it receives.
struct ReversingDevice {
    assembler: Mutex<ChunkAssembler>,
    drop_sequence_once: Option<u16>,
    dropped: AtomicBool,
    seen: Mutex<Vec<ChunkHeader>>,
}

impl ReversingDevice {
    fn new(max_message_size: usize, drop_sequence_once: Option<u16>) -> Arc<Self> {
        Arc::new(Self {
            assembler: Mutex::new(ChunkAssembler::new(DEFAULT_MTU, max_message_size)),
            drop_sequence_once,
            dropped: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChannelIo for ReversingDevice {
    async fn write(&self, data: &[u8], _mode: WriteMode) -> gattrpc_transport::Result<()> {
        let header = ChunkHeader::decode(data).expect("client sends full headers");
        self.seen.lock().unwrap().push(header);

        if self.drop_sequence_once == Some(header.sequence) && !self.dropped.swap(true, Ordering::SeqCst)
        {
            return Ok(());
        }

        let mut asm = self.assembler.lock().unwrap();
        if let Assembled::Message(message) = asm.consume(data) {
            let reversed: Vec<u8> = message.iter().rev().copied().collect();
            asm.respond(&reversed).expect("reply should chunk");
        }
        Ok(())
    }

    async fn read(&self) -> gattrpc_transport::Result<Bytes> {
        Ok(self.assembler.lock().unwrap().next_response())
    }
}

#[tokio::test]
async fn framer_and_assembler_exchange_large_messages() {
    let device = ReversingDevice::new(16 * 1024, None);
    let framer = ChunkFramer::new(device.clone());

    let message: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let response = framer.send(&message).await.expect("exchange should succeed");

    let expected: Vec<u8> = message.iter().rev().copied().collect();
    assert_eq!(response.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn dropped_chunk_is_recovered_by_resend() {
    let device = ReversingDevice::new(16 * 1024, Some(1));
    let framer = ChunkFramer::new(device.clone());

    let response = framer.send(&[1, 2, 3].repeat(200)).await.expect("resend should recover");
    assert_eq!(response.len(), 600);

    let ids: Vec<u8> = device.seen.lock().unwrap().iter().map(|h| h.message_id).collect();
    assert_eq!(ids, vec![1, 1, 1, 2, 2, 2]);
}

#[tokio::test]
async fn device_buffer_overflow_surfaces_as_error() {
    let device = ReversingDevice::new(256, None);
    let framer = ChunkFramer::with_config(device, FramerConfig::default());

    let err = framer.send(&[0u8; 1024]).await.expect_err("overflow should fail");
    assert!(matches!(err, FrameError::SizeOverflow));
}

proptest! {
    #[test]
    fn split_then_reassemble_is_identity(
        message in proptest::collection::vec(any::<u8>(), 0..2048),
        mtu in 5usize..300,
        id in any::<u8>(),
    ) {
        let chunks = split_message(id, &message, mtu).unwrap();
        prop_assert!(chunks.iter().all(|c| c.len() <= mtu));
        let reassembled = reassemble(&chunks).unwrap();
        prop_assert_eq!(reassembled.as_ref(), message.as_slice());
    }
}
