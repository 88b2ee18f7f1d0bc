use std::path::PathBuf;

use crate::value::Value;

/// Errors returned by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] gattrpc_transport::TransportError),

    /// Framing or chunk-sequencing error.
    #[error("frame error: {0}")]
    Frame(#[from] gattrpc_frame::FrameError),

    /// The client is not connected and authenticated.
    #[error("device is not ready")]
    NotReady,

    /// The remote method reported failure (`ok: false`).
    #[error("RPC Error: {detail}")]
    Rpc { method: String, detail: Value },

    /// The remote method returned a result of an unexpected shape.
    #[error("unexpected result from {method}: {detail}")]
    UnexpectedResult { method: String, detail: String },

    /// Request encoding failed.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Response decoding failed.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Secret store error.
    #[error("secret store error: {0}")]
    Store(#[from] StoreError),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The background supervisor was already started or taken.
    #[error("supervisor already started")]
    AlreadyStarted,
}

impl ClientError {
    /// Returns true for errors caused by a missing or lost link.
    pub fn is_disconnected(&self) -> bool {
        match self {
            ClientError::NotReady => true,
            ClientError::Transport(err) => err.is_disconnected(),
            ClientError::Frame(err) => err.is_disconnected(),
            _ => false,
        }
    }

    /// Returns true for chunk-sequencing failures.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ClientError::Frame(err) if err.is_protocol())
    }
}

/// Errors from secret store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing a backend file failed.
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
