//! Lifecycle hooks for servers and clients.
//!
//! Hooks let an application react to lifecycle events without touching the
//! routing core. Every method has a default, so implementors only override
//! what they need.

use tracing::{debug, info};

use super::Connection;

/// Lifecycle callbacks for a [`Server`](super::Server).
pub trait ServerHooks {
    /// A new peer connection was added to the table.
    fn on_connected(&mut self, conn: &Connection) {
        debug!(connection_id = conn.id(), address = %conn.address(), "Peer connected");
    }

    /// A peer connection was removed from the table.
    fn on_disconnected(&mut self, conn: &Connection) {
        debug!(connection_id = conn.id(), "Peer disconnected");
    }

    /// The server started listening.
    fn on_server_start(&mut self, _port: u16) {}

    /// The server stopped.
    fn on_server_stop(&mut self) {}
}

/// Lifecycle callbacks for a [`Client`](super::Client).
pub trait ClientHooks {
    /// The transport confirmed the outbound connection.
    fn on_connected(&mut self, _conn: &Connection) {
        debug!("Connected to server");
    }

    /// The connection closed or could not be established.
    fn on_disconnected(&mut self) {
        debug!("Disconnected from server");
    }

    /// A connection attempt was started.
    fn on_client_start(&mut self, address: &str, port: u16) {
        info!(address, port, "Connecting to server");
    }

    /// The client was stopped.
    fn on_client_stop(&mut self) {
        info!("Disconnecting from server");
    }
}

/// Hooks that keep every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ServerHooks for NoHooks {}

impl ClientHooks for NoHooks {}
