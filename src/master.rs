//! Master server.
//!
//! The standalone server the binary runs: a [`Server`] with lifecycle
//! logging and a built-in ping responder used for health checks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::endpoint::{Connection, Server, ServerHooks, ServerOptions};
use crate::handlers::handler;
use crate::transport::{ConnectionId, Transport};

/// Message types answered by every master server.
pub mod msg_types {
    use crate::protocol::MessageType;

    /// Health check. The payload is echoed back.
    pub const PING: MessageType = 1;
    /// Reply to [`PING`].
    pub const PONG: MessageType = 2;
}

const EMPTY_PONG: &[u8] = b"pong";

/// Server hooks that log peers and keep a roster of who is connected.
#[derive(Debug, Default)]
pub struct MasterHooks {
    peers: HashMap<ConnectionId, String>,
    total_connections: u64,
}

impl MasterHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of a connected peer.
    pub fn peer_address(&self, id: ConnectionId) -> Option<&str> {
        self.peers.get(&id).map(String::as_str)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Connections accepted since start, including closed ones.
    pub fn total_connections(&self) -> u64 {
        self.total_connections
    }
}

impl ServerHooks for MasterHooks {
    fn on_connected(&mut self, conn: &Connection) {
        self.total_connections += 1;
        self.peers.insert(conn.id(), conn.address().to_string());
        info!(
            connection_id = conn.id(),
            address = %conn.address(),
            peers = self.peers.len(),
            "Peer connected"
        );
    }

    fn on_disconnected(&mut self, conn: &Connection) {
        self.peers.remove(&conn.id());
        info!(
            connection_id = conn.id(),
            address = %conn.address(),
            peers = self.peers.len(),
            "Peer disconnected"
        );
    }

    fn on_server_start(&mut self, port: u16) {
        info!(port, "Master server listening");
    }

    fn on_server_stop(&mut self) {
        info!(
            total_connections = self.total_connections,
            "Master server stopped"
        );
        self.peers.clear();
    }
}

/// Bind the built-in handlers on `server`.
///
/// `PING` is answered with `PONG` carrying the same payload, or `"pong"`
/// when the ping was empty.
pub fn register_builtin_handlers<H: ServerHooks>(server: &mut Server<H>) {
    server.register_handler(
        msg_types::PING,
        handler(|msg| {
            let payload = if msg.payload.is_empty() {
                EMPTY_PONG
            } else {
                msg.payload
            };
            if !msg.connection.send_msg(msg_types::PONG, payload) {
                warn!(connection_id = msg.connection.id(), "Failed to answer ping");
            }
        }),
    );
}

/// Build a master server on `transport` configured from `settings`.
pub fn build_master(transport: Arc<dyn Transport>, settings: &Settings) -> Server<MasterHooks> {
    let mut server = Server::new(
        transport,
        ServerOptions::from_settings(settings),
        MasterHooks::new(),
    );
    register_builtin_handlers(&mut server);
    server
}
