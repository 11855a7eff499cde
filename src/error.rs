//! Error types for the streaming client

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Streaming client errors
#[derive(Error, Debug)]
pub enum StreamingError {
    /// Handshake rejected with 403: the token is invalid.
    #[error("invalid token for {endpoint}")]
    Forbidden { endpoint: String },

    /// Handshake rejected with 401: no token was accepted.
    #[error("token not provided for {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("can't connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("handshake with {endpoint} did not complete within {timeout:?}")]
    HandshakeTimeout { endpoint: String, timeout: Duration },

    #[error("token can't be sent as a header value")]
    InvalidToken,

    #[error("can't read message: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("no pong received within {0:?}")]
    KeepaliveTimeout(Duration),

    #[error("connection closed by peer: {0}")]
    PeerClosed(String),

    #[error("connection closed")]
    Closed,

    #[error("can't {action}: {source}")]
    Write {
        action: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("orderbook depth {depth} out of range [1, {max}]")]
    InvalidDepth { depth: u32, max: u32 },

    #[error("can't encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Error returned by the caller's event handler, passed through untouched.
    #[error(transparent)]
    Handler(anyhow::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl StreamingError {
    /// Whether the caller has to re-acquire credentials before reconnecting.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            StreamingError::Forbidden { .. } | StreamingError::Unauthorized { .. }
        )
    }
}

/// Reasons an inbound frame is dropped by the read loop
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("can't decode event envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("can't decode {kind} event: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown event {0:?}")]
    Unrecognized(String),
}

pub type Result<T> = std::result::Result<T, StreamingError>;
