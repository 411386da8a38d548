//! Client core: one outbound connection to a server.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{ConnectionErrorKind, NetError, NetResult};
use crate::handlers::{Handler, HandlerRegistry};
use crate::protocol::MessageType;
use crate::transport::framing::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::{Transport, TransportEvent, CLIENT_CONNECTION_ID};

use super::hooks::{ClientHooks, NoHooks};
use super::{Connection, ConnectionOwner, ConnectionState};

/// Local id of a started client.
const CLIENT_HOST_ID: u32 = 0;

/// Client options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server address used by [`Client::connect`].
    pub address: String,
    /// Server port used by [`Client::connect`].
    pub port: u16,
    /// Largest frame accepted for sending.
    pub max_frame_size: usize,
    /// Trace every frame at the connection level.
    pub log_messages: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 5000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_messages: false,
        }
    }
}

impl ClientOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            address: settings.client.address.clone(),
            port: settings.client.port,
            max_frame_size: settings.limits.max_frame_size,
            log_messages: settings.logging.log_messages,
        }
    }
}

/// Message client.
///
/// Like [`Server`](super::Server), a client is driven by calling
/// [`pump`](Self::pump) from a single thread.
pub struct Client<H: ClientHooks = NoHooks> {
    transport: Arc<dyn Transport>,
    options: ClientOptions,
    hooks: H,
    handlers: HandlerRegistry,
    connection: Option<Connection>,
    state: ConnectionState,
    host_id: Option<u32>,
    /// `Disconnected` events still queued for sessions this client closed.
    pending_closes: usize,
}

impl Client<NoHooks> {
    /// Create a client without lifecycle hooks.
    pub fn without_hooks(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        Self::new(transport, options, NoHooks)
    }
}

impl<H: ClientHooks> Client<H> {
    pub fn new(transport: Arc<dyn Transport>, options: ClientOptions, hooks: H) -> Self {
        Self {
            transport,
            options,
            hooks,
            handlers: HandlerRegistry::new(),
            connection: None,
            state: ConnectionState::None,
            host_id: None,
            pending_closes: 0,
        }
    }

    /// Connect to the configured address and port.
    pub fn connect(&mut self) -> NetResult<()> {
        let address = self.options.address.clone();
        self.connect_to(&address, self.options.port)
    }

    /// Start connecting to `address:port`.
    ///
    /// The local connection is created right away; the state stays
    /// `Connecting` until the transport confirms.
    pub fn connect_to(&mut self, address: &str, port: u16) -> NetResult<()> {
        self.close_session();

        self.transport.connect(address, port)?;

        self.options.address = address.to_string();
        self.options.port = port;
        self.host_id = Some(CLIENT_HOST_ID);
        self.connection = Some(
            Connection::new(
                ConnectionOwner::Client,
                address,
                CLIENT_HOST_ID,
                CLIENT_CONNECTION_ID,
                Arc::clone(&self.transport),
            )
            .with_max_frame_size(self.options.max_frame_size)
            .with_message_logging(self.options.log_messages),
        );
        self.state = ConnectionState::Connecting;

        self.hooks.on_client_start(address, port);
        Ok(())
    }

    /// Close the connection.
    pub fn stop(&mut self) {
        self.close_session();
        self.state = ConnectionState::Disconnected;

        self.hooks.on_client_stop();
    }

    /// Close the current session, if any, and remember that its
    /// `Disconnected` event belongs to it and not to the next one.
    fn close_session(&mut self) {
        let closed = match self.connection.take() {
            Some(conn) => conn.disconnect(),
            None => self.transport.disconnect(CLIENT_CONNECTION_ID),
        };
        if closed {
            self.pending_closes += 1;
        }
    }

    /// Drain every queued transport event. Returns the number handled.
    ///
    /// Does nothing until the first connect.
    pub fn pump(&mut self) -> usize {
        if self.host_id.is_none() {
            return 0;
        }

        let mut handled = 0;
        while let Some(event) = self.transport.poll_next_event() {
            handled += 1;
            match event {
                TransportEvent::Connected(_) => self.handle_connect(),
                TransportEvent::Data(_, frame) => self.handle_data(&frame),
                TransportEvent::Disconnected(_) if self.pending_closes > 0 => {
                    self.pending_closes -= 1;
                    debug!("Skipping disconnect of a closed session");
                }
                TransportEvent::Disconnected(_) => self.handle_disconnect(),
            }
        }
        handled
    }

    fn handle_connect(&mut self) {
        let Some(conn) = self.connection.as_ref() else {
            debug!("Ignoring connect confirmation for a stopped client");
            return;
        };
        if self.state.is_connected() {
            debug!("Ignoring repeated connect confirmation");
            return;
        }

        info!(address = %conn.address(), port = self.options.port, "Connected");
        self.state = ConnectionState::Connected;
        self.hooks.on_connected(conn);
    }

    fn handle_data(&mut self, frame: &[u8]) {
        match self.connection.as_ref() {
            Some(conn) => {
                // Failures are logged by the connection and only drop this frame.
                let _ = conn.transport_receive(frame, &self.handlers);
            }
            None => {
                debug!(bytes = frame.len(), "Dropping data for a stopped client");
            }
        }
    }

    fn handle_disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.disconnect();
        }
        info!(address = %self.options.address, port = self.options.port, "Disconnected");
        self.state = ConnectionState::Disconnected;
        self.hooks.on_disconnected();
    }

    /// Send an already packed frame to the server.
    pub fn send(&self, frame: &[u8]) -> bool {
        match self.connected() {
            Some(conn) => conn.send(frame),
            None => false,
        }
    }

    /// Pack and send a typed message to the server.
    pub fn send_msg(&self, msg_type: MessageType, payload: &[u8]) -> bool {
        match self.connected() {
            Some(conn) => conn.send_msg(msg_type, payload),
            None => false,
        }
    }

    /// Serialize `value` as JSON and send it to the server.
    pub fn send_json<T: Serialize>(&self, msg_type: MessageType, value: &T) -> bool {
        self.connected()
            .is_some_and(|conn| conn.send_json(msg_type, value))
    }

    fn connected(&self) -> Option<&Connection> {
        let conn = self
            .connection
            .as_ref()
            .filter(|_| self.state.is_connected());
        if conn.is_none() {
            warn!(
                state = %self.state,
                error = %NetError::connection(ConnectionErrorKind::NotConnected),
                "Send rejected"
            );
        }
        conn
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

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn connection_mut(&mut self) -> Option<&mut Connection> {
        self.connection.as_mut()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }
}
