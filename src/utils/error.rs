//! Error types shared by the broker, the TCP transport and the client.
//!
//! `ProtocolError` is special: its `Display` output is exactly the text sent
//! back to the peer in an `{"status": "error", "message": ...}` reply.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::broker::connection::ConnectionId;

/// Recoverable request errors. Reported to the offending connection, which
/// stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Topic is required")]
    MissingTopic,
}

/// Failures on the server side of a connection. Any of these ends the
/// affected session only.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("connection {id} is not reading ({queued} frames queued)")]
    Stalled { id: ConnectionId, queued: usize },
}

/// Failures surfaced by the client session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("line codec error: {0}")]
    Codec(#[from] LinesCodecError),
}
