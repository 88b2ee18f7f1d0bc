use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;

/// Receives one `()` per physical disconnect of a device.
pub type DisconnectReceiver = broadcast::Receiver<()>;

/// Delivery mode for a channel write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Acknowledged write. The call resolves once the device confirmed it.
    WithResponse,
    /// Best-effort write without link-level acknowledgement.
    WithoutResponse,
}

/// A single bidirectional channel on the device (a GATT characteristic).
#[async_trait]
pub trait ChannelIo: Send + Sync {
    /// Write one packet to the channel.
    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<()>;

    /// Read one packet from the channel.
    ///
    /// Devices answer with a short packet (shorter than a chunk header) when
    /// they have nothing queued.
    async fn read(&self) -> Result<Bytes>;
}

/// A logical service exposed by a connected device.
#[async_trait]
pub trait Service: Send + Sync {
    /// The service identifier.
    fn uuid(&self) -> Uuid;

    /// Resolve a channel of this service.
    async fn channel(&self, id: Uuid) -> Result<Arc<dyn ChannelIo>>;
}

/// An opaque handle to a device returned by the platform chooser.
#[async_trait]
pub trait Device: Send + Sync {
    /// Display name of the device, used in logs.
    fn name(&self) -> String;

    /// Open the link and enumerate the primary services.
    async fn connect(&self) -> Result<Vec<Arc<dyn Service>>>;

    /// Whether the physical link is currently up.
    fn is_connected(&self) -> bool;

    /// Subscribe to physical disconnect notifications.
    fn disconnect_events(&self) -> DisconnectReceiver;
}

/// The platform device chooser.
#[async_trait]
pub trait DeviceSelector: Send + Sync {
    /// Prompt for a device exposing `service`.
    async fn request_device(&self, service: Uuid) -> Result<Arc<dyn Device>>;
}
