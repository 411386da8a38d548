//! Shared helpers for unit tests.

use std::sync::Arc;

use crate::endpoint::{Connection, ConnectionOwner};
use crate::transport::{ConnectionId, MemoryNetwork};

/// A server-side connection on a throwaway in-memory endpoint.
pub(crate) fn test_connection(id: ConnectionId) -> Connection {
    let transport = Arc::new(MemoryNetwork::new().endpoint());
    Connection::new(ConnectionOwner::Server, "test-peer", 0, id, transport)
}
