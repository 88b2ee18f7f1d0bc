use gattrpc_transport::TransportError;

/// Errors that can occur while chunking or exchanging messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The device answered "no data" twice in a row.
    #[error("received empty response twice")]
    EmptyResponse,

    /// The device answered "no data" after the response had started.
    #[error("received empty chunk in the middle of a response")]
    EmptyContinuation,

    /// The device could not buffer the request.
    #[error("device reported size overflow")]
    SizeOverflow,

    /// The device kept reporting missed chunks.
    #[error("device reported missed chunks after {attempts} transmissions")]
    MissedChunks { attempts: u32 },

    /// A response chunk arrived out of order.
    #[error("out-of-sequence chunk (expected {expected}, got {got})")]
    OutOfSequence { expected: u16, got: u16 },

    /// The reassembled response exceeds the configured maximum.
    #[error("response too large ({size} bytes, max {max})")]
    ResponseTooLarge { size: usize, max: usize },

    /// The message needs more chunks than the sequence space allows.
    #[error("message too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The MTU leaves no room for payload after the chunk header.
    #[error("mtu {0} leaves no room for chunk payload")]
    InvalidMtu(usize),

    /// A chunk stream that does not form exactly one message.
    #[error("malformed chunk stream: {0}")]
    Malformed(String),

    /// Link-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl FrameError {
    /// Returns true for chunk-sequencing failures reported by or about the device.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            FrameError::EmptyResponse
                | FrameError::EmptyContinuation
                | FrameError::SizeOverflow
                | FrameError::MissedChunks { .. }
                | FrameError::OutOfSequence { .. }
                | FrameError::ResponseTooLarge { .. }
                | FrameError::Malformed(_)
        )
    }

    /// Returns true if the exchange failed because the link went away.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, FrameError::Transport(err) if err.is_disconnected())
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
