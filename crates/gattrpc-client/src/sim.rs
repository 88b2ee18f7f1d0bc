//! In-memory simulated peripheral.
//!
//! [`SimDevice`] speaks the same chunk protocol, auth handshake and RPC
//! envelope as firmware on a real device, so the whole client stack can be
//! exercised without a radio. The RPC channel buffers up to
//! `16 KiB + 500` bytes per message and the auth channel 1 KiB.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gattrpc_frame::{Assembled, ChunkAssembler, ChunkHeader, DEFAULT_MTU};
use gattrpc_transport::{
    ChannelIo, Device, DeviceSelector, DisconnectReceiver, Service, TransportError, Uuid,
    WriteMode, AUTH_CHANNEL_UUID, RPC_CHANNEL_UUID, SERVICE_UUID,
};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::broadcast;

use crate::auth::{sign_challenge, AuthInfoWire};
use crate::rpc::{RpcRequest, RpcResponse};
use crate::value::Value;

/// Application handler: `Ok` maps to `ok: true`, `Err` to `ok: false`.
pub type AppHandler = Arc<dyn Fn(&str, &[Value]) -> Result<Value, Value> + Send + Sync>;

const CHALLENGE_LEN: usize = 32;
const SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub name: String,
    /// Reported as `id` by `auth_info`, normally the device MAC.
    pub device_id: Vec<u8>,
    /// Whether the device starts in pairing mode.
    pub pairable: bool,
    pub mtu: usize,
    pub rpc_buffer: usize,
    pub auth_buffer: usize,
    /// Delay applied to every channel write.
    pub write_latency: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "gattrpc-sim".to_string(),
            device_id: vec![0x24, 0x6f, 0x28, 0x1a, 0x2b, 0x3c],
            pairable: true,
            mtu: DEFAULT_MTU,
            rpc_buffer: 16 * 1024 + 500,
            auth_buffer: 1024,
            write_latency: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimChannel {
    Rpc,
    Auth,
}

/// One chunk written by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub channel: SimChannel,
    pub header: ChunkHeader,
    pub mode: WriteMode,
}

/// Per-connection state. Replaced on every connect and disconnect.
struct Session {
    challenge: [u8; CHALLENGE_LEN],
    authenticated: bool,
    last_timestamp: Option<i64>,
    rpc: ChunkAssembler,
    auth: ChunkAssembler,
}

impl Session {
    fn new(config: &SimConfig) -> Self {
        Self {
            challenge: random_bytes(),
            authenticated: false,
            last_timestamp: None,
            rpc: ChunkAssembler::new(config.mtu, config.rpc_buffer),
            auth: ChunkAssembler::new(config.mtu, config.auth_buffer),
        }
    }

    fn renew_challenge(&mut self) {
        self.challenge = random_bytes();
    }
}

struct State {
    pairable: bool,
    /// Client id to HMAC secret.
    secrets: HashMap<Vec<u8>, Vec<u8>>,
    session: Session,
}

/// A simulated device.
pub struct SimDevice {
    this: Weak<SimDevice>,
    config: SimConfig,
    handler: AppHandler,
    state: Mutex<State>,
    connected: AtomicBool,
    stall_reads: AtomicBool,
    fail_connects: AtomicUsize,
    connects: AtomicUsize,
    writes: Mutex<Vec<WriteRecord>>,
    disconnects: broadcast::Sender<()>,
}

impl SimDevice {
    pub fn new(config: SimConfig, handler: AppHandler) -> Arc<Self> {
        let state = State {
            pairable: config.pairable,
            secrets: HashMap::new(),
            session: Session::new(&config),
        };
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            handler,
            state: Mutex::new(state),
            connected: AtomicBool::new(false),
            stall_reads: AtomicBool::new(false),
            fail_connects: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            disconnects: broadcast::channel(16).0,
            config,
        })
    }

    /// A device serving [`echo_handler`].
    pub fn echo(config: SimConfig) -> Arc<Self> {
        Self::new(config, echo_handler())
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn set_pairable(&self, pairable: bool) {
        self.lock_state().pairable = pairable;
    }

    pub fn is_pairable(&self) -> bool {
        self.lock_state().pairable
    }

    /// Forget every paired client.
    pub fn revoke_all(&self) {
        self.lock_state().secrets.clear();
    }

    pub fn paired_clients(&self) -> usize {
        self.lock_state().secrets.len()
    }

    /// Whether the current connection has authenticated.
    pub fn session_authenticated(&self) -> bool {
        self.lock_state().session.authenticated
    }

    /// Timestamp sent with the last accepted `authenticate`.
    pub fn last_auth_timestamp(&self) -> Option<i64> {
        self.lock_state().session.last_timestamp
    }

    /// Drop the link and notify listeners.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.lock_state().session = Session::new(&self.config);
        let _ = self.disconnects.send(());
    }

    /// While set, reads on the RPC channel never complete.
    pub fn stall_reads(&self, stall: bool) {
        self.stall_reads.store(stall, Ordering::SeqCst);
    }

    /// Fail the next `count` connect attempts.
    pub fn fail_connects(&self, count: usize) {
        self.fail_connects.store(count, Ordering::SeqCst);
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every chunk written so far, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.writes).clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    async fn write(
        &self,
        channel: SimChannel,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        if !self.config.write_latency.is_zero() {
            tokio::time::sleep(self.config.write_latency).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if let Some(header) = ChunkHeader::decode(data) {
            lock(&self.writes).push(WriteRecord {
                channel,
                header,
                mode,
            });
        }

        let mut state = self.lock_state();
        let assembled = match channel {
            SimChannel::Rpc => state.session.rpc.consume(data),
            SimChannel::Auth => state.session.auth.consume(data),
        };
        let Assembled::Message(message) = assembled else {
            return Ok(());
        };

        let response = match rmp_serde::from_slice::<RpcRequest>(&message) {
            Ok(request) => match channel {
                SimChannel::Rpc => self.handle_rpc(&mut state, &request),
                SimChannel::Auth => self.handle_auth(&mut state, &request),
            },
            Err(err) => {
                tracing::debug!(error = %err, "sim: undecodable request");
                fail("Invalid request")
            }
        };
        let encoded = rmp_serde::to_vec_named(&response).map_err(invalid_data)?;
        let assembler = match channel {
            SimChannel::Rpc => &mut state.session.rpc,
            SimChannel::Auth => &mut state.session.auth,
        };
        assembler.respond(&encoded).map_err(invalid_data)
    }

    async fn read(&self, channel: SimChannel) -> Result<Bytes, TransportError> {
        if channel == SimChannel::Rpc && self.stall_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let mut state = self.lock_state();
        Ok(match channel {
            SimChannel::Rpc => state.session.rpc.next_response(),
            SimChannel::Auth => state.session.auth.next_response(),
        })
    }

    fn handle_rpc(&self, state: &mut State, request: &RpcRequest) -> RpcResponse {
        if !state.session.authenticated {
            return fail("Not authenticated");
        }
        match (self.handler)(&request.method, &request.args) {
            Ok(result) => RpcResponse { ok: true, result },
            Err(result) => RpcResponse { ok: false, result },
        }
    }

    fn handle_auth(&self, state: &mut State, request: &RpcRequest) -> RpcResponse {
        match request.method.as_str() {
            "auth_info" => self.auth_info(state),
            "pair" => pair(state, &request.args),
            "authenticate" => authenticate(state, &request.args),
            _ => fail("Unknown method"),
        }
    }

    /// Hands out a fresh challenge on every call.
    fn auth_info(&self, state: &mut State) -> RpcResponse {
        state.session.renew_challenge();
        let info = AuthInfoWire {
            id: Value::from(self.config.device_id.clone()),
            hmac_msg: Value::from(&state.session.challenge[..]),
            pairable: state.pairable,
        };
        match rmp_serde::to_vec_named(&info) {
            Ok(encoded) => ok(Value::Bytes(encoded)),
            Err(err) => {
                tracing::error!(error = %err, "sim: failed to encode auth info");
                fail("Internal error")
            }
        }
    }
}

impl std::fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDevice")
            .field("name", &self.config.name)
            .field("device_id", &hex::encode(&self.config.device_id))
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Outside pairing mode the reply is an empty secret.
fn pair(state: &mut State, args: &[Value]) -> RpcResponse {
    let Some(client_id) = args.first().and_then(Value::as_bytes) else {
        return fail("Invalid arguments");
    };
    if !state.pairable {
        return ok(Value::Bytes(Vec::new()));
    }
    let secret: [u8; SECRET_LEN] = random_bytes();
    state.secrets.insert(client_id.to_vec(), secret.to_vec());
    state.pairable = false;
    tracing::debug!(client_id = %hex::encode(client_id), "sim: paired");
    ok(Value::from(&secret[..]))
}

/// The challenge is consumed whether or not the signature matches.
fn authenticate(state: &mut State, args: &[Value]) -> RpcResponse {
    let (Some(client_id), Some(signature), Some(timestamp)) = (
        args.first().and_then(Value::as_bytes),
        args.get(1).and_then(Value::as_bytes),
        args.get(2).and_then(Value::as_i64),
    ) else {
        return fail("Invalid arguments");
    };
    let challenge = state.session.challenge;
    state.session.renew_challenge();

    let accepted = state
        .secrets
        .get(client_id)
        .is_some_and(|secret| sign_challenge(secret, &challenge)[..] == *signature);
    if accepted {
        state.session.authenticated = true;
        state.session.last_timestamp = Some(timestamp);
    }
    ok(Value::Bool(accepted))
}

/// Answers `echo` with its first argument and `ping` with `"pong"`.
pub fn echo_handler() -> AppHandler {
    Arc::new(|method: &str, args: &[Value]| match method {
        "echo" => Ok(args.first().cloned().unwrap_or_default()),
        "ping" => Ok(Value::from("pong")),
        _ => Err(Value::from(format!("Unknown method: {method}"))),
    })
}

#[async_trait]
impl Device for SimDevice {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    async fn connect(&self) -> Result<Vec<Arc<dyn Service>>, TransportError> {
        let refused = self
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect {
                device: self.config.name.clone(),
                reason: "connection refused".to_string(),
            });
        }

        let device = self.this.upgrade().ok_or(TransportError::Disconnected)?;
        self.lock_state().session = Session::new(&self.config);
        self.connected.store(true, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Arc::new(SimService { device })])
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect_events(&self) -> DisconnectReceiver {
        self.disconnects.subscribe()
    }
}

struct SimService {
    device: Arc<SimDevice>,
}

#[async_trait]
impl Service for SimService {
    fn uuid(&self) -> Uuid {
        SERVICE_UUID
    }

    async fn channel(&self, id: Uuid) -> Result<Arc<dyn ChannelIo>, TransportError> {
        let channel = if id == RPC_CHANNEL_UUID {
            SimChannel::Rpc
        } else if id == AUTH_CHANNEL_UUID {
            SimChannel::Auth
        } else {
            return Err(TransportError::MissingChannel(id));
        };
        Ok(Arc::new(SimChannelIo {
            device: self.device.clone(),
            channel,
        }))
    }
}

struct SimChannelIo {
    device: Arc<SimDevice>,
    channel: SimChannel,
}

#[async_trait]
impl ChannelIo for SimChannelIo {
    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        self.device.write(self.channel, data, mode).await
    }

    async fn read(&self) -> Result<Bytes, TransportError> {
        self.device.read(self.channel).await
    }
}

/// A chooser that always offers the same simulated device.
#[derive(Debug, Clone, Default)]
pub struct SimSelector {
    device: Option<Arc<SimDevice>>,
}

impl SimSelector {
    pub fn new(device: Arc<SimDevice>) -> Self {
        Self {
            device: Some(device),
        }
    }

    /// A chooser the user always dismisses.
    pub fn dismissed() -> Self {
        Self { device: None }
    }
}

#[async_trait]
impl DeviceSelector for SimSelector {
    async fn request_device(&self, service: Uuid) -> Result<Arc<dyn Device>, TransportError> {
        if service != SERVICE_UUID {
            return Err(TransportError::Selection(format!(
                "no device offers service {service}"
            )));
        }
        match &self.device {
            Some(device) => Ok(device.clone()),
            None => Err(TransportError::Selection("user cancelled the chooser".to_string())),
        }
    }
}

fn ok(result: Value) -> RpcResponse {
    RpcResponse { ok: true, result }
}

fn fail(detail: &str) -> RpcResponse {
    RpcResponse {
        ok: false,
        result: Value::from(detail),
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn invalid_data(err: impl std::fmt::Display) -> TransportError {
    TransportError::Io(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
