//! Authenticated, chunked RPC over constrained device links.
//!
//! gattrpc lets a host call named methods on a small device reachable over a
//! low-bandwidth, packet-oriented link (typically a BLE GATT service). Requests
//! and responses are split into MTU-sized chunks, the client pairs with the
//! device once and authenticates every connection with an HMAC challenge, and
//! a supervisor reconnects in the background.
//!
//! # Crate Structure
//!
//! - [`transport`]: Link abstraction (channels, devices, disconnect unwinding)
//! - [`frame`]: Chunk framing with retry, and the device-side assembler
//! - [`client`]: RPC envelope, pairing/auth, connection supervisor and `RpcClient`

/// Re-export transport types.
pub mod transport {
    pub use gattrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use gattrpc_frame::*;
}

/// Re-export client types. The simulated peripheral lives in `client::sim`
/// (requires `sim` feature).
pub mod client {
    pub use gattrpc_client::*;
}
