use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use gattrpc_transport::{
    ChannelIo, ChannelSlot, Device, TransportError, AUTH_CHANNEL_UUID, RPC_CHANNEL_UUID,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthOutcome, Authenticator};
use crate::client::ClientConfig;
use crate::clock::{Clock, Debounce};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::status::ConnectionStatus;

/// Link state shared by the supervisor, the disconnect listener and callers.
pub(crate) struct Link {
    status: watch::Sender<ConnectionStatus>,
    device: Mutex<Option<Arc<dyn Device>>>,
    pub(crate) rpc_slot: Arc<ChannelSlot>,
    pub(crate) auth_slot: Arc<ChannelSlot>,
    pub(crate) events: EventBus,
    generation: AtomicU64,
    transition: Mutex<()>,
}

impl Link {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            status,
            device: Mutex::new(None),
            rpc_slot: Arc::new(ChannelSlot::new("rpc")),
            auth_slot: Arc::new(ChannelSlot::new("auth")),
            events: EventBus::new(),
            generation: AtomicU64::new(0),
            transition: Mutex::new(()),
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn device(&self) -> Option<Arc<dyn Device>> {
        self.lock_device().clone()
    }

    /// Connected flag set and the physical link still up.
    pub(crate) fn is_connected(&self) -> bool {
        self.status().connected && self.device().is_some_and(|d| d.is_connected())
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.status().authenticated && self.is_connected()
    }

    /// Swap in a newly selected device. Link state of the old one is dropped
    /// without emitting events.
    pub(crate) fn replace_device(&self, device: Arc<dyn Device>) -> ConnectionStatus {
        self.cleanup();
        *self.lock_device() = Some(device);
        self.update(|s| s.device_selected = true)
    }

    /// React to a physical disconnect.
    pub(crate) fn handle_disconnect(&self) {
        let name = self.device().map(|d| d.name()).unwrap_or_default();
        tracing::info!(device = %name, "disconnected");
        let status = self.cleanup();
        self.events.emit(ClientEvent::Disconnected);
        self.events.emit(ClientEvent::StatusChanged(status));
    }

    /// Install freshly opened channels unless the link changed since
    /// `generation` was read.
    pub(crate) fn commit_connect(
        &self,
        generation: u64,
        rpc: Arc<dyn ChannelIo>,
        auth: Arc<dyn ChannelIo>,
    ) -> Option<ConnectionStatus> {
        let _transition = self.lock_transition();
        if self.generation() != generation {
            return None;
        }
        self.rpc_slot.install(rpc);
        self.auth_slot.install(auth);
        Some(self.update(|s| {
            s.connected = true;
            s.needs_pairing = false;
            s.authenticated = false;
        }))
    }

    /// Apply an authentication result unless the link changed since
    /// `generation` was read.
    pub(crate) fn commit_auth(
        &self,
        generation: u64,
        authenticated: bool,
    ) -> Option<ConnectionStatus> {
        let _transition = self.lock_transition();
        if self.generation() != generation {
            return None;
        }
        Some(self.update(|s| {
            s.authenticated = authenticated;
            s.needs_pairing = !authenticated;
        }))
    }

    fn cleanup(&self) -> ConnectionStatus {
        let _transition = self.lock_transition();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.rpc_slot.release();
        self.auth_slot.release();
        self.update(|s| {
            s.connected = false;
            s.authenticated = false;
        })
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionStatus)) -> ConnectionStatus {
        self.status.send_modify(f);
        self.status()
    }

    fn lock_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_device(&self) -> MutexGuard<'_, Option<Arc<dyn Device>>> {
        self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The connection state machine.
///
/// Each [`tick`](Supervisor::tick) attempts a connect when a device is
/// selected but not connected (at most once per connect debounce window),
/// then an authentication when connected but not authenticated (at most once
/// per auth debounce window). Ticks take `&mut self`, so they never overlap.
pub struct Supervisor {
    link: Arc<Link>,
    authenticator: Authenticator,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    connect_timeout: Duration,
    auth_timeout: Option<Duration>,
    connect: Debounce,
    auth: Debounce,
}

impl Supervisor {
    pub(crate) fn new(
        link: Arc<Link>,
        authenticator: Authenticator,
        clock: Arc<dyn Clock>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            link,
            authenticator,
            clock,
            tick_interval: config.tick_interval,
            connect_timeout: config.connect_timeout,
            auth_timeout: config.call_timeout,
            connect: Debounce::new(config.connect_debounce),
            auth: Debounce::new(config.auth_debounce),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.link.status()
    }

    /// Drive ticks at the configured interval until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::debug!(tick = ?self.tick_interval, "supervisor started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.tick() => {}
            }
        }
        tracing::debug!("supervisor stopped");
    }

    /// Run one iteration of the state machine.
    pub async fn tick(&mut self) {
        if let Some(device) = self.link.device() {
            if !self.link.is_connected() && self.connect.ready(self.clock.now()) {
                self.connect.mark(self.clock.now());
                self.try_connect(device).await;
            }
        }

        let status = self.link.status();
        if self.link.is_connected()
            && !status.authenticated
            && self.auth.ready(self.clock.now())
        {
            self.auth.mark(self.clock.now());
            self.try_authenticate().await;
        }
    }

    async fn try_connect(&mut self, device: Arc<dyn Device>) {
        let name = device.name();
        let generation = self.link.generation();
        tracing::debug!(device = %name, "connecting");

        let opened = bounded(Some(self.connect_timeout), open_link(device.as_ref())).await;
        let (rpc, auth) = match opened {
            Ok(channels) => channels,
            Err(err) => {
                tracing::error!(device = %name, error = %err, "failed to connect");
                return;
            }
        };

        let committed = if device.is_connected() {
            self.link.commit_connect(generation, rpc, auth)
        } else {
            None
        };
        let Some(status) = committed else {
            tracing::warn!(device = %name, "link dropped while connecting");
            return;
        };
        self.connect.reset();
        self.auth.reset();

        tracing::info!(device = %name, "connected");
        self.link.events.emit(ClientEvent::Connected);
        self.link.events.emit(ClientEvent::StatusChanged(status));
    }

    async fn try_authenticate(&mut self) {
        let generation = self.link.generation();
        let outcome = match bounded(self.auth_timeout, self.authenticator.authenticate()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "authentication attempt failed");
                AuthOutcome::Rejected
            }
        };

        let authenticated = outcome.is_authenticated();
        let Some(status) = self.link.commit_auth(generation, authenticated) else {
            tracing::debug!("link changed during authentication, discarding result");
            return;
        };

        if authenticated {
            self.link.events.emit(ClientEvent::Ready);
            self.link.events.emit(ClientEvent::StatusChanged(status));
        } else {
            tracing::info!(?outcome, "device needs pairing");
            self.link.events.emit(ClientEvent::NeedPairing);
            self.link.events.emit(ClientEvent::StatusChanged(status));
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("status", &self.link.status())
            .field("tick_interval", &self.tick_interval)
            .field("connect_debounce", &self.connect.window())
            .field("auth_debounce", &self.auth.window())
            .finish()
    }
}

/// Open the link and resolve the RPC and auth channels.
async fn open_link(device: &dyn Device) -> Result<(Arc<dyn ChannelIo>, Arc<dyn ChannelIo>)> {
    let services = device.connect().await?;
    if services.len() != 1 {
        return Err(TransportError::ServiceCount {
            found: services.len(),
        }
        .into());
    }
    let service = &services[0];
    let rpc = service.channel(RPC_CHANNEL_UUID).await?;
    let auth = service.channel(AUTH_CHANNEL_UUID).await?;
    Ok((rpc, auth))
}

/// Await `fut`, failing with [`ClientError::Timeout`] after `limit` if set.
pub(crate) async fn bounded<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ClientError::Timeout(limit))?,
        None => fut.await,
    }
}
