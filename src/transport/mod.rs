//! Transport module.
//!
//! A transport moves opaque frames between endpoints and reports connection
//! lifecycle as a queue of [`TransportEvent`]s. Implementations manage their
//! own threads or tasks; the bus only ever calls the non-blocking methods of
//! [`Transport`] from its pump.

pub mod framing;
mod memory;
mod tcp;

use crate::error::NetResult;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

/// Identifies one transport session. `0` is the client-side connection.
pub type ConnectionId = u32;

/// Connection id used by the client role.
pub const CLIENT_CONNECTION_ID: ConnectionId = 0;

/// An event queued by the transport for the pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A session was established.
    Connected(ConnectionId),
    /// One complete frame arrived on a session.
    Data(ConnectionId, Vec<u8>),
    /// A session closed, or an outbound connect failed.
    Disconnected(ConnectionId),
}

impl TransportEvent {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Connected(id) | Self::Data(id, _) | Self::Disconnected(id) => *id,
        }
    }
}

/// Byte-frame transport used by servers and clients.
///
/// All methods must be safe to call from any thread and must not block.
pub trait Transport: Send + Sync {
    /// Start accepting sessions on `port`. Returns the port actually bound.
    fn listen(&self, port: u16) -> NetResult<u16>;

    /// Begin an outbound session. Completion is reported through
    /// `Connected(0)`, failure through `Disconnected(0)`.
    fn connect(&self, address: &str, port: u16) -> NetResult<()>;

    /// Close one session. Returns `false` if it was not open.
    fn disconnect(&self, connection_id: ConnectionId) -> bool;

    /// Stop listening and close every session.
    fn stop(&self);

    /// Queue one frame for a session. Returns `false` if it cannot be queued.
    fn send(&self, connection_id: ConnectionId, frame: &[u8]) -> bool;

    /// Take the next queued event, if any.
    fn poll_next_event(&self) -> Option<TransportEvent>;

    /// Remote address of a session.
    fn remote_address(&self, connection_id: ConnectionId) -> Option<String>;
}
