//! Authenticated RPC client for constrained device links.
//!
//! This is the "just works" layer. Select a device, let the supervisor
//! connect, pair and authenticate in the background, then issue
//! `call(method, args)` once the client reports ready.
//!
//! - [`RpcCaller`] encodes `{method, args}` requests and decodes
//!   `{ok, result}` responses on top of a chunk framer.
//! - [`SecretStore`] keeps the client identity and per-device secrets.
//! - [`Authenticator`] runs pairing and HMAC challenge/response.
//! - [`Supervisor`] owns the connection state machine.
//! - [`RpcClient`] ties them together.

pub mod auth;
pub mod client;
pub mod clock;
pub mod error;
pub mod events;
pub mod rpc;
pub mod secret_store;
#[cfg(feature = "sim")]
pub mod sim;
pub mod status;
pub mod supervisor;
pub mod value;

pub use auth::{sign_challenge, AuthChallenge, AuthOutcome, Authenticator};
pub use client::{ClientConfig, RpcClient};
pub use clock::{Clock, Debounce, ManualClock, SystemClock};
pub use error::{ClientError, Result, StoreError};
pub use events::{ClientEvent, EventBus, EventKind, SubscriptionId};
pub use rpc::{decode_response, encode_request, RpcCaller, RpcRequest, RpcResponse};
pub use secret_store::{
    ClientId, FileBackend, KeyValueBackend, MemoryBackend, Secret, SecretStore, CLIENT_ID_KEY,
    SECRETS_KEY,
};
pub use status::ConnectionStatus;
pub use supervisor::Supervisor;
pub use value::Value;
