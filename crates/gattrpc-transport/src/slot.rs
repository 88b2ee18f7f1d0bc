use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};
use crate::traits::{ChannelIo, WriteMode};

/// A swappable handle to the currently resolved channel.
///
/// The supervisor installs a channel after each successful connect and
/// releases it on disconnect. Releasing cancels every read or write still
/// running against the old handle, which then fails with
/// [`TransportError::Disconnected`].
pub struct ChannelSlot {
    label: &'static str,
    inner: Mutex<Option<Installed>>,
}

struct Installed {
    io: Arc<dyn ChannelIo>,
    token: CancellationToken,
}

impl ChannelSlot {
    /// Create an empty slot. `label` is only used in logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            inner: Mutex::new(None),
        }
    }

    /// Install a freshly resolved channel, replacing (and cancelling) any previous one.
    pub fn install(&self, io: Arc<dyn ChannelIo>) {
        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            old.token.cancel();
        }
        *guard = Some(Installed {
            io,
            token: CancellationToken::new(),
        });
        tracing::debug!(channel = self.label, "channel installed");
    }

    /// Drop the current channel. Returns false if the slot was already empty.
    pub fn release(&self) -> bool {
        match self.lock().take() {
            Some(old) => {
                old.token.cancel();
                tracing::debug!(channel = self.label, "channel released");
                true
            }
            None => false,
        }
    }

    /// Whether a channel is installed.
    pub fn is_installed(&self) -> bool {
        self.lock().is_some()
    }

    fn current(&self) -> Result<(Arc<dyn ChannelIo>, CancellationToken)> {
        self.lock()
            .as_ref()
            .map(|installed| (Arc::clone(&installed.io), installed.token.clone()))
            .ok_or(TransportError::Disconnected)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Installed>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ChannelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSlot")
            .field("label", &self.label)
            .field("installed", &self.is_installed())
            .finish()
    }
}

#[async_trait]
impl ChannelIo for ChannelSlot {
    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<()> {
        let (io, token) = self.current()?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(TransportError::Disconnected),
            result = io.write(data, mode) => result,
        }
    }

    async fn read(&self) -> Result<Bytes> {
        let (io, token) = self.current()?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(TransportError::Disconnected),
            result = io.read() => result,
        }
    }
}
