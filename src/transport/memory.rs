//! In-process loopback transport.
//!
//! A [`MemoryNetwork`] is a switchboard shared by any number of
//! [`MemoryTransport`] endpoints. Delivery is immediate and ordered, which
//! makes it the transport of choice for deterministic tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{NetError, NetResult};

use super::{ConnectionId, Transport, TransportEvent, CLIENT_CONNECTION_ID};

type EndpointId = u64;

/// First port handed out when listening on port 0.
const EPHEMERAL_PORT_START: u16 = 49_152;

struct Session {
    peer_endpoint: EndpointId,
    peer_connection: ConnectionId,
    remote_address: String,
}

struct Endpoint {
    events: VecDeque<TransportEvent>,
    sessions: HashMap<ConnectionId, Session>,
    next_connection_id: ConnectionId,
    listening: Option<u16>,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            sessions: HashMap::new(),
            next_connection_id: 1,
            listening: None,
        }
    }
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<EndpointId, Endpoint>,
    listeners: HashMap<u16, EndpointId>,
    next_endpoint: EndpointId,
    next_port: u16,
}

impl NetworkState {
    fn endpoint(&mut self, id: EndpointId) -> &mut Endpoint {
        self.endpoints.entry(id).or_insert_with(Endpoint::new)
    }

    fn close_session(&mut self, endpoint: EndpointId, connection_id: ConnectionId) -> bool {
        let Some(session) = self.endpoint(endpoint).sessions.remove(&connection_id) else {
            return false;
        };
        self.endpoint(endpoint)
            .events
            .push_back(TransportEvent::Disconnected(connection_id));

        let peer = self.endpoint(session.peer_endpoint);
        if peer.sessions.remove(&session.peer_connection).is_some() {
            peer.events
                .push_back(TransportEvent::Disconnected(session.peer_connection));
        }
        true
    }

    fn allocate_port(&mut self) -> u16 {
        if self.next_port < EPHEMERAL_PORT_START {
            self.next_port = EPHEMERAL_PORT_START;
        }
        while self.listeners.contains_key(&self.next_port) {
            self.next_port = self.next_port.checked_add(1).unwrap_or(EPHEMERAL_PORT_START);
        }
        let port = self.next_port;
        self.next_port = self.next_port.checked_add(1).unwrap_or(EPHEMERAL_PORT_START);
        port
    }
}

/// Shared switchboard for in-memory endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint attached to this network.
    pub fn endpoint(&self) -> MemoryTransport {
        let mut state = self.lock();
        let id = state.next_endpoint;
        state.next_endpoint += 1;
        state.endpoint(id);
        MemoryTransport {
            network: self.clone(),
            endpoint: id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: EndpointId,
}

impl MemoryTransport {
    /// Address other endpoints see for this one.
    pub fn address(&self) -> String {
        format!("mem-{}", self.endpoint)
    }

    /// Queue an arbitrary event on this endpoint, as if the transport had
    /// produced it.
    pub fn inject(&self, event: TransportEvent) {
        self.network
            .lock()
            .endpoint(self.endpoint)
            .events
            .push_back(event);
    }

    /// Number of queued, not yet polled events.
    pub fn pending_events(&self) -> usize {
        self.network.lock().endpoint(self.endpoint).events.len()
    }

    /// Number of open sessions on this endpoint.
    pub fn session_count(&self) -> usize {
        self.network.lock().endpoint(self.endpoint).sessions.len()
    }
}

impl Transport for MemoryTransport {
    fn listen(&self, port: u16) -> NetResult<u16> {
        let mut state = self.network.lock();
        let port = if port == 0 { state.allocate_port() } else { port };

        match state.listeners.get(&port) {
            Some(owner) if *owner != self.endpoint => {
                return Err(NetError::Transport {
                    message: format!("Port {} already in use", port),
                });
            }
            _ => {}
        }

        if let Some(previous) = state.endpoint(self.endpoint).listening.replace(port) {
            state.listeners.remove(&previous);
        }
        state.listeners.insert(port, self.endpoint);
        debug!(endpoint = self.endpoint, port, "Memory transport listening");
        Ok(port)
    }

    fn connect(&self, _address: &str, port: u16) -> NetResult<()> {
        let mut state = self.network.lock();
        state.close_session(self.endpoint, CLIENT_CONNECTION_ID);

        let Some(server) = state.listeners.get(&port).copied() else {
            state
                .endpoint(self.endpoint)
                .events
                .push_back(TransportEvent::Disconnected(CLIENT_CONNECTION_ID));
            return Ok(());
        };

        let server_endpoint = state.endpoint(server);
        let server_connection = server_endpoint.next_connection_id;
        server_endpoint.next_connection_id += 1;
        server_endpoint.sessions.insert(
            server_connection,
            Session {
                peer_endpoint: self.endpoint,
                peer_connection: CLIENT_CONNECTION_ID,
                remote_address: self.address(),
            },
        );
        server_endpoint
            .events
            .push_back(TransportEvent::Connected(server_connection));

        let client = state.endpoint(self.endpoint);
        client.sessions.insert(
            CLIENT_CONNECTION_ID,
            Session {
                peer_endpoint: server,
                peer_connection: server_connection,
                remote_address: format!("mem-{}", server),
            },
        );
        client
            .events
            .push_back(TransportEvent::Connected(CLIENT_CONNECTION_ID));

        Ok(())
    }

    fn disconnect(&self, connection_id: ConnectionId) -> bool {
        self.network.lock().close_session(self.endpoint, connection_id)
    }

    fn stop(&self) {
        let mut state = self.network.lock();
        if let Some(port) = state.endpoint(self.endpoint).listening.take() {
            state.listeners.remove(&port);
        }

        let ids: Vec<_> = state
            .endpoint(self.endpoint)
            .sessions
            .keys()
            .copied()
            .collect();
        for id in ids {
            state.close_session(self.endpoint, id);
        }
        state.endpoint(self.endpoint).events.clear();
    }

    fn send(&self, connection_id: ConnectionId, frame: &[u8]) -> bool {
        let mut state = self.network.lock();
        let Some((peer_endpoint, peer_connection)) = state
            .endpoint(self.endpoint)
            .sessions
            .get(&connection_id)
            .map(|s| (s.peer_endpoint, s.peer_connection))
        else {
            return false;
        };

        state
            .endpoint(peer_endpoint)
            .events
            .push_back(TransportEvent::Data(peer_connection, frame.to_vec()));
        true
    }

    fn poll_next_event(&self) -> Option<TransportEvent> {
        self.network.lock().endpoint(self.endpoint).events.pop_front()
    }

    fn remote_address(&self, connection_id: ConnectionId) -> Option<String> {
        self.network
            .lock()
            .endpoint(self.endpoint)
            .sessions
            .get(&connection_id)
            .map(|s| s.remote_address.clone())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.stop();
        self.network.lock().endpoints.remove(&self.endpoint);
    }
}
