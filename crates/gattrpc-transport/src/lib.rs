//! Link abstraction for chunked RPC over a constrained device link.
//!
//! This is the lowest layer of gattrpc. A remote device exposes one logical
//! service with a small number of characteristic-style channels, each of
//! which supports acknowledged writes, unacknowledged writes and a blocking
//! read. Everything else builds on the [`ChannelIo`] trait defined here.
//!
//! The platform side (device chooser, link, services) is provided by the host
//! through the [`DeviceSelector`], [`Device`] and [`Service`] traits.

pub mod error;
pub mod ids;
pub mod slot;
pub mod traits;

pub use error::{Result, TransportError};
pub use ids::{AUTH_CHANNEL_UUID, RPC_CHANNEL_UUID, SERVICE_UUID};
pub use slot::ChannelSlot;
pub use traits::{ChannelIo, Device, DeviceSelector, DisconnectReceiver, Service, WriteMode};
pub use uuid::Uuid;
