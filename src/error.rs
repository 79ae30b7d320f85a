//! Feed client error types.

use thiserror::Error;

/// Errors returned by the feed client.
///
/// Only caller-facing failures are returned as `Err`. Server `error` frames and
/// an exhausted reconnect budget are reported through [`crate::ws::FeedEvent`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("Connection is closing")]
    Closing,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    #[error("Invalid auth token: {0}")]
    InvalidToken(String),

    #[error("Invalid depth {0}: must be between 1 and {max}", max = crate::ws::MAX_DEPTH)]
    InvalidDepth(u32),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Feed client has shut down")]
    Shutdown,
}

impl From<serde_json::Error> for WsError {
    fn from(err: serde_json::Error) -> Self {
        WsError::DeserializationError(err.to_string())
    }
}
