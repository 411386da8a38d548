//! Server core: accepts and tracks many peer connections.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{ConnectionErrorKind, NetError, NetResult};
use crate::handlers::{Handler, HandlerRegistry};
use crate::protocol::MessageType;
use crate::transport::framing::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::{ConnectionId, Transport, TransportEvent};

use super::hooks::{NoHooks, ServerHooks};
use super::{Connection, ConnectionOwner, ConnectionState};

/// Host id reported by connections while the server is running.
const SERVER_HOST_ID: u32 = 0;

/// Server options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Port used by [`Server::start`].
    pub port: u16,
    /// Largest frame accepted for sending.
    pub max_frame_size: usize,
    /// Trace every frame at the connection level.
    pub log_messages: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 5000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_messages: false,
        }
    }
}

impl ServerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            port: settings.server.port,
            max_frame_size: settings.limits.max_frame_size,
            log_messages: settings.logging.log_messages,
        }
    }
}

/// Message server.
///
/// All methods run on the thread that drives [`pump`](Self::pump); the
/// connection table and handler registry are owned here and never shared.
pub struct Server<H: ServerHooks = NoHooks> {
    transport: Arc<dyn Transport>,
    options: ServerOptions,
    hooks: H,
    handlers: HandlerRegistry,
    connections: HashMap<ConnectionId, Connection>,
    state: ConnectionState,
    host_id: Option<u32>,
    local_port: Option<u16>,
}

impl Server<NoHooks> {
    /// Create a server without lifecycle hooks.
    pub fn without_hooks(transport: Arc<dyn Transport>, options: ServerOptions) -> Self {
        Self::new(transport, options, NoHooks)
    }
}

impl<H: ServerHooks> Server<H> {
    pub fn new(transport: Arc<dyn Transport>, options: ServerOptions, hooks: H) -> Self {
        Self {
            transport,
            options,
            hooks,
            handlers: HandlerRegistry::new(),
            connections: HashMap::new(),
            state: ConnectionState::None,
            host_id: None,
            local_port: None,
        }
    }

    /// Start listening on the configured port.
    pub fn start(&mut self) -> NetResult<u16> {
        self.start_on(self.options.port)
    }

    /// Start listening on `port`. Returns the port actually bound.
    pub fn start_on(&mut self, port: u16) -> NetResult<u16> {
        info!(port, "Starting server");
        let bound = self.transport.listen(port)?;

        self.options.port = port;
        self.local_port = Some(bound);
        self.host_id = Some(SERVER_HOST_ID);
        self.state = ConnectionState::Connected;

        self.hooks.on_server_start(bound);
        Ok(bound)
    }

    /// Close every connection and stop the transport.
    pub fn stop(&mut self) {
        info!(connections = self.connections.len(), "Stopping server");

        for conn in self.connections.values() {
            conn.disconnect();
        }
        self.connections.clear();
        self.transport.stop();

        self.host_id = None;
        self.local_port = None;
        self.state = ConnectionState::Disconnected;

        self.hooks.on_server_stop();
    }

    /// Drain every queued transport event. Returns the number handled.
    ///
    /// Does nothing until the server has been started.
    pub fn pump(&mut self) -> usize {
        if self.host_id.is_none() {
            return 0;
        }

        let mut handled = 0;
        while let Some(event) = self.transport.poll_next_event() {
            handled += 1;
            match event {
                TransportEvent::Connected(id) => self.handle_connect(id),
                TransportEvent::Data(id, frame) => self.handle_data(id, &frame),
                TransportEvent::Disconnected(id) => self.handle_disconnect(id),
            }
        }
        handled
    }

    fn handle_connect(&mut self, id: ConnectionId) {
        if self.connections.contains_key(&id) {
            warn!(
                error = %NetError::connection(ConnectionErrorKind::DuplicateConnectionId { id }),
                "Ignoring connection"
            );
            return;
        }

        let address = self.transport.remote_address(id).unwrap_or_default();
        let host_id = self.host_id.unwrap_or(SERVER_HOST_ID);
        let conn = Connection::new(
            ConnectionOwner::Server,
            address,
            host_id,
            id,
            Arc::clone(&self.transport),
        )
        .with_max_frame_size(self.options.max_frame_size)
        .with_message_logging(self.options.log_messages);

        debug!(connection_id = id, address = %conn.address(), "Connection added");
        let conn = self.connections.entry(id).or_insert(conn);
        self.hooks.on_connected(conn);
    }

    fn handle_data(&mut self, id: ConnectionId, frame: &[u8]) {
        match self.connections.get(&id) {
            Some(conn) => {
                // Failures are logged by the connection and only drop this frame.
                let _ = conn.transport_receive(frame, &self.handlers);
            }
            None => {
                warn!(
                    error = %NetError::connection(ConnectionErrorKind::UnknownConnectionId { id }),
                    bytes = frame.len(),
                    "Dropping data"
                );
            }
        }
    }

    fn handle_disconnect(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.remove(&id) {
            conn.disconnect();
            debug!(connection_id = id, "Connection removed");
            self.hooks.on_disconnected(&conn);
        }
    }

    /// Send an already packed frame to one connection.
    pub fn send(&self, id: ConnectionId, frame: &[u8]) -> bool {
        match self.connections.get(&id) {
            Some(conn) => conn.send(frame),
            None => {
                debug!(connection_id = id, "Send to unknown connection");
                false
            }
        }
    }

    /// Pack and send a typed message to one connection.
    pub fn send_msg(&self, id: ConnectionId, msg_type: MessageType, payload: &[u8]) -> bool {
        match self.connections.get(&id) {
            Some(conn) => conn.send_msg(msg_type, payload),
            None => {
                debug!(connection_id = id, msg_type, "Send to unknown connection");
                false
            }
        }
    }

    /// Serialize `value` as JSON and send it to one connection.
    pub fn send_json<T: Serialize>(&self, id: ConnectionId, msg_type: MessageType, value: &T) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|conn| conn.send_json(msg_type, value))
    }

    /// Ask the transport to close every tracked connection.
    ///
    /// Connections stay in the table until their `Disconnected` events are
    /// pumped. Returns the number of connections asked to close.
    pub fn disconnect_all(&self) -> usize {
        for conn in self.connections.values() {
            conn.disconnect();
        }
        self.connections.len()
    }

    /// Bind `handler` to `msg_type`, replacing any previous binding.
    pub fn register_handler(&mut self, msg_type: MessageType, handler: Handler) {
        self.handlers.register(msg_type, handler);
    }

    /// Bind `handler` to `msg_type` alongside existing handlers.
    pub fn append_handler(&mut self, msg_type: MessageType, handler: Handler) {
        self.handlers.append(msg_type, handler);
    }

    pub fn unregister_handler(&mut self, msg_type: MessageType, handler: &Handler) -> bool {
        self.handlers.unregister(msg_type, handler)
    }

    pub fn clear_handlers(&mut self) {
        self.handlers.clear();
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Mutable access, e.g. to install a per-connection handler table.
    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Remote address of a connection, as reported by the transport.
    pub fn connection_info(&self, id: ConnectionId) -> Option<String> {
        self.transport.remote_address(id)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the server is listening.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Port bound by the last successful start.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }
}
