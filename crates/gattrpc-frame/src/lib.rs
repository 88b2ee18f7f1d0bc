//! Chunked message framing for constrained device links.
//!
//! Links such as BLE characteristics carry packets of a few hundred bytes at
//! most. Every logical message is split into chunks, each prefixed with:
//! - a 1-byte message id shared by all chunks of one transmission
//! - a 2-byte little-endian sequence number starting at 0
//! - a 1-byte flag set (`FINAL`, `MISSED_CHUNKS`, `SIZE_OVERFLOW`)
//!
//! [`ChunkFramer`] drives the client side of an exchange (write, read back,
//! resend on missed chunks). [`ChunkAssembler`] is the device-side
//! counterpart. [`SerialQueue`] keeps exchanges from interleaving.

pub mod assembler;
pub mod codec;
pub mod error;
pub mod flags;
pub mod framer;
pub mod queue;

pub use assembler::{Assembled, ChunkAssembler, NO_DATA};
pub use codec::{
    is_no_data, payload_capacity, reassemble, split_message, Chunk, ChunkHeader, DEFAULT_MTU,
    HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use flags::ChunkFlags;
pub use framer::{ChunkFramer, FramerConfig, MessageTransport, DEFAULT_MAX_RESPONSE_SIZE};
pub use queue::SerialQueue;
