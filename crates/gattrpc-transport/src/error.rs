use uuid::Uuid;

/// Errors that can occur on the device link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link is down, or was torn down while an operation was in flight.
    #[error("device disconnected")]
    Disconnected,

    /// No device has been selected yet.
    #[error("no device selected")]
    NoDevice,

    /// The platform device chooser failed or was dismissed.
    #[error("device selection failed: {0}")]
    Selection(String),

    /// Failed to open the link to the device.
    #[error("failed to connect to {device}: {reason}")]
    Connect { device: String, reason: String },

    /// The device does not expose exactly one service.
    #[error("bad amount of services ({found}, expected 1)")]
    ServiceCount { found: usize },

    /// A required channel is missing from the service.
    #[error("channel {0} not found on service")]
    MissingChannel(Uuid),

    /// A platform I/O error on the link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns true if this error means the link is gone.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, TransportError::Disconnected | TransportError::NoDevice)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
