use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use gattrpc_frame::{ChunkFramer, FramerConfig, MessageTransport};
use gattrpc_transport::{DeviceSelector, DisconnectReceiver, SERVICE_UUID};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::clock::{Clock, SystemClock};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::rpc::RpcCaller;
use crate::secret_store::SecretStore;
use crate::status::ConnectionStatus;
use crate::supervisor::{bounded, Link, Supervisor};
use crate::value::Value;

/// Timing knobs for the client and its supervisor.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Supervisor tick period.
    pub tick_interval: Duration,
    /// Minimum spacing between connect attempts.
    pub connect_debounce: Duration,
    /// Minimum spacing between authentication attempts.
    pub auth_debounce: Duration,
    /// Upper bound for one `call()` and for one authentication attempt.
    /// `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    /// Upper bound for opening the link and resolving its channels.
    pub connect_timeout: Duration,
    /// Framing parameters shared by the RPC and auth channels.
    pub framer: FramerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(200),
            connect_debounce: Duration::from_millis(5000),
            auth_debounce: Duration::from_millis(1000),
            call_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
            framer: FramerConfig::default(),
        }
    }
}

/// Authenticated RPC client for one device at a time.
///
/// ```ignore
/// let client = RpcClient::new(selector, Arc::new(SecretStore::open(dir)));
/// client.start()?;
/// client.select_device().await?;
/// // ... wait for ClientEvent::Ready ...
/// let temp = client.call("read_temperature", &[]).await?;
/// ```
pub struct RpcClient {
    link: Arc<Link>,
    rpc: Arc<RpcCaller<dyn MessageTransport>>,
    selector: Arc<dyn DeviceSelector>,
    store: Arc<SecretStore>,
    config: ClientConfig,
    supervisor: Mutex<Option<Supervisor>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl RpcClient {
    pub fn new(selector: Arc<dyn DeviceSelector>, store: Arc<SecretStore>) -> Self {
        Self::with_config(selector, store, ClientConfig::default())
    }

    pub fn with_config(
        selector: Arc<dyn DeviceSelector>,
        store: Arc<SecretStore>,
        config: ClientConfig,
    ) -> Self {
        Self::with_clock(selector, store, config, Arc::new(SystemClock))
    }

    /// Build a client whose debounce windows and auth timestamps follow `clock`.
    pub fn with_clock(
        selector: Arc<dyn DeviceSelector>,
        store: Arc<SecretStore>,
        config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let link = Arc::new(Link::new());

        let rpc_framer: Arc<dyn MessageTransport> = Arc::new(ChunkFramer::with_config(
            link.rpc_slot.clone(),
            config.framer.clone(),
        ));
        let auth_framer: Arc<dyn MessageTransport> = Arc::new(ChunkFramer::with_config(
            link.auth_slot.clone(),
            config.framer.clone(),
        ));

        let authenticator = Authenticator::new(
            Arc::new(RpcCaller::new(auth_framer)),
            store.clone(),
            clock.clone(),
        );
        let supervisor = Supervisor::new(link.clone(), authenticator, clock, &config);

        Self {
            link,
            rpc: Arc::new(RpcCaller::new(rpc_framer)),
            selector,
            store,
            config,
            supervisor: Mutex::new(Some(supervisor)),
            listener: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Spawn the supervisor loop on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        let supervisor = self.take_supervisor().ok_or(ClientError::AlreadyStarted)?;
        tokio::spawn(supervisor.run(self.shutdown.child_token()));
        Ok(())
    }

    /// Take the supervisor to drive it by hand with [`Supervisor::tick`].
    ///
    /// Returns `None` once it has been taken or started.
    pub fn take_supervisor(&self) -> Option<Supervisor> {
        lock(&self.supervisor).take()
    }

    /// Invoke `method` on the device.
    ///
    /// Fails fast with [`ClientError::NotReady`] unless connected and
    /// authenticated. Concurrent calls are served in submission order.
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        if !self.link.is_ready() {
            return Err(ClientError::NotReady);
        }
        bounded(self.config.call_timeout, self.rpc.call(method, args)).await
    }

    /// Ask the platform for a device and make it the current one.
    ///
    /// Any previously selected device is dropped together with its disconnect
    /// listener. Connecting is left to the supervisor.
    pub async fn select_device(&self) -> Result<()> {
        let device = self.selector.request_device(SERVICE_UUID).await?;
        let disconnects = device.disconnect_events();
        let name = device.name();

        if let Some(previous) = lock(&self.listener).take() {
            previous.abort();
        }
        let status = self.link.replace_device(device);
        *lock(&self.listener) = Some(tokio::spawn(watch_disconnects(
            Arc::downgrade(&self.link),
            disconnects,
        )));

        tracing::info!(device = %name, "device selected");
        self.link.events.emit(ClientEvent::StatusChanged(status));
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.link.status().authenticated
    }

    pub fn needs_pairing(&self) -> bool {
        self.link.status().needs_pairing
    }

    pub fn ready(&self) -> bool {
        self.link.is_ready()
    }

    pub fn is_device_selected(&self) -> bool {
        self.link.status().device_selected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.link.status()
    }

    /// Watch status snapshots as they change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.link.watch()
    }

    pub fn events(&self) -> &EventBus {
        &self.link.events
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.link.events.subscribe()
    }

    pub fn store(&self) -> &Arc<SecretStore> {
        &self.store
    }

    /// Stop the supervisor and the disconnect listener.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("status", &self.link.status())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn watch_disconnects(link: Weak<Link>, mut disconnects: DisconnectReceiver) {
    loop {
        match disconnects.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                let Some(link) = link.upgrade() else { break };
                link.handle_disconnect();
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
