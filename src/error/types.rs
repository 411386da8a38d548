//! Error types for the message bus.

use thiserror::Error;

use crate::protocol::MessageType;
use crate::transport::ConnectionId;

/// Main error type for the bus.
#[derive(Error, Debug)]
pub enum NetError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Transport-level errors (bind, connect, runtime).
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Framing and dispatch errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// Connection table errors.
    #[error("Connection error: {kind}")]
    Connection { kind: ConnectionErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Frame too short: {len} bytes, header needs 2")]
    FrameTooShort { len: usize },

    #[error("Unknown message type: {msg_type}")]
    UnknownMessageType { msg_type: MessageType },

    #[error("Refusing to send an empty payload")]
    EmptyPayload,

    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Connection error kinds.
#[derive(Error, Debug)]
pub enum ConnectionErrorKind {
    #[error("Unknown connection id: {id}")]
    UnknownConnectionId { id: ConnectionId },

    #[error("Duplicate connection id: {id}")]
    DuplicateConnectionId { id: ConnectionId },

    #[error("Not connected")]
    NotConnected,
}

impl NetError {
    pub(crate) fn protocol(kind: ProtocolErrorKind) -> Self {
        Self::Protocol { kind }
    }

    pub(crate) fn connection(kind: ConnectionErrorKind) -> Self {
        Self::Connection { kind }
    }
}

/// Result type alias for bus operations.
pub type NetResult<T> = Result<T, NetError>;
