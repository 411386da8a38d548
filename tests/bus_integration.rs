//! Integration tests for the message bus.
//!
//! These tests run real servers and clients against each other, over TCP on
//! an ephemeral localhost port and over the in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::time::{sleep, Instant};

use relaybus::endpoint::{
    Client, ClientHooks, ClientOptions, Connection, ConnectionState, Server, ServerHooks,
    ServerOptions,
};
use relaybus::handlers::{handler, HandlerRegistry};
use relaybus::protocol::{pack, Envelope};
use relaybus::transport::framing::DEFAULT_MAX_FRAME_SIZE;
use relaybus::transport::{
    ConnectionId, MemoryNetwork, TcpTransport, Transport, TransportEvent,
};

const PING: u16 = 7;
const PONG: u16 = 8;

/// Server hooks that record every lifecycle call.
#[derive(Default)]
struct ServerLog {
    connected: Vec<ConnectionId>,
    disconnected: Vec<ConnectionId>,
}

impl ServerHooks for ServerLog {
    fn on_connected(&mut self, conn: &Connection) {
        self.connected.push(conn.id());
    }

    fn on_disconnected(&mut self, conn: &Connection) {
        self.disconnected.push(conn.id());
    }
}

/// Client hooks that count lifecycle calls.
#[derive(Default)]
struct ClientLog {
    connected: usize,
    disconnected: usize,
}

impl ClientHooks for ClientLog {
    fn on_connected(&mut self, _conn: &Connection) {
        self.connected += 1;
    }

    fn on_disconnected(&mut self) {
        self.disconnected += 1;
    }
}

/// Pump both endpoints until `done` holds or five seconds pass.
async fn pump_until<S, C, F>(server: &mut Server<S>, client: &mut Client<C>, mut done: F) -> bool
where
    S: ServerHooks,
    C: ClientHooks,
    F: FnMut(&Server<S>, &Client<C>) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        server.pump();
        client.pump();
        if done(server, client) {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    false
}

fn tcp_transport() -> Arc<TcpTransport> {
    Arc::new(TcpTransport::new(
        Handle::current(),
        "127.0.0.1",
        DEFAULT_MAX_FRAME_SIZE,
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_ping_pong() {
    let mut server = Server::new(tcp_transport(), ServerOptions::default(), ServerLog::default());
    let port = server.start_on(0).expect("server should start");
    assert_ne!(port, 0);
    assert_eq!(server.state(), ConnectionState::Connected);

    let seen: Arc<Mutex<Vec<(ConnectionId, Vec<u8>)>>> = Arc::default();
    {
        let seen = Arc::clone(&seen);
        server.register_handler(
            PING,
            handler(move |msg| {
                seen.lock()
                    .unwrap()
                    .push((msg.connection.id(), msg.payload.to_vec()));
                assert!(msg.connection.send_msg(PONG, b"pong"));
            }),
        );
    }

    let mut client = Client::new(tcp_transport(), ClientOptions::default(), ClientLog::default());
    let replies: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();
    {
        let replies = Arc::clone(&replies);
        client.register_handler(
            PONG,
            handler(move |msg| replies.lock().unwrap().push(msg.payload.to_vec())),
        );
    }

    client.connect_to("127.0.0.1", port).unwrap();
    assert_eq!(client.state(), ConnectionState::Connecting);

    assert!(
        pump_until(&mut server, &mut client, |s, c| {
            c.is_connected() && s.connection_count() == 1
        })
        .await,
        "client never connected"
    );
    assert_eq!(client.hooks().connected, 1);

    assert!(client.send_msg(PING, b"ping"));
    assert!(
        pump_until(&mut server, &mut client, |_, _| !replies.lock().unwrap().is_empty()).await,
        "no pong received"
    );

    let connected_id = server.hooks().connected[0];
    assert_eq!(*seen.lock().unwrap(), vec![(connected_id, b"ping".to_vec())]);
    assert_eq!(*replies.lock().unwrap(), vec![b"pong".to_vec()]);
    assert!(server
        .connection_info(connected_id)
        .is_some_and(|addr| addr.starts_with("127.0.0.1")));

    client.stop();
    assert!(
        pump_until(&mut server, &mut client, |s, _| s.connection_count() == 0).await,
        "server never saw the disconnect"
    );
    assert_eq!(server.hooks().disconnected, vec![connected_id]);

    server.stop();
    assert_eq!(server.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_reconnect_after_stop() {
    let mut server = Server::new(tcp_transport(), ServerOptions::default(), ServerLog::default());
    let port = server.start_on(0).unwrap();
    server.register_handler(
        PING,
        handler(|msg| {
            msg.connection.send_msg(PONG, msg.payload);
        }),
    );

    let mut client = Client::new(tcp_transport(), ClientOptions::default(), ClientLog::default());
    let replies: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();
    {
        let replies = Arc::clone(&replies);
        client.register_handler(
            PONG,
            handler(move |msg| replies.lock().unwrap().push(msg.payload.to_vec())),
        );
    }

    client.connect_to("127.0.0.1", port).unwrap();
    assert!(pump_until(&mut server, &mut client, |_, c| c.is_connected()).await);

    // Reconnect without pumping in between.
    client.stop();
    client.connect_to("127.0.0.1", port).unwrap();
    assert!(
        pump_until(&mut server, &mut client, |s, c| {
            c.is_connected() && s.hooks().disconnected.len() == 1 && s.connection_count() == 1
        })
        .await,
        "second session never came up"
    );
    assert_eq!(client.hooks().connected, 2);
    assert_eq!(client.hooks().disconnected, 0);

    assert!(client.send_msg(PING, b"second"));
    assert!(
        pump_until(&mut server, &mut client, |_, _| !replies.lock().unwrap().is_empty()).await,
        "no pong on the second session"
    );
    assert_eq!(*replies.lock().unwrap(), vec![b"second".to_vec()]);
    assert!(client.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_failed_connect_reports_disconnect() {
    // Grab a free port, then close it so nothing is listening.
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let mut server = Server::without_hooks(tcp_transport(), ServerOptions::default());
    let mut client = Client::new(tcp_transport(), ClientOptions::default(), ClientLog::default());
    client.connect_to("127.0.0.1", port).unwrap();

    assert!(
        pump_until(&mut server, &mut client, |_, c| {
            c.state() == ConnectionState::Disconnected
        })
        .await,
        "failed connect was never reported"
    );
    assert_eq!(client.hooks().connected, 0);
    assert_eq!(client.hooks().disconnected, 1);
    assert!(client.connection().is_none());
    assert!(!client.send_msg(PING, b"late"));
}

#[test]
fn test_server_stop_clears_connections() {
    let network = MemoryNetwork::new();
    let mut server = Server::new(
        Arc::new(network.endpoint()),
        ServerOptions::default(),
        ServerLog::default(),
    );
    let port = server.start_on(0).unwrap();

    let peers: Vec<_> = (0..5).map(|_| network.endpoint()).collect();
    for peer in &peers {
        peer.connect("localhost", port).unwrap();
    }
    server.pump();
    assert_eq!(server.connection_count(), 5);
    let ids = server.connection_ids();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    server.stop();

    assert_eq!(server.connection_count(), 0);
    assert!(!server.is_connected());
    for id in ids {
        assert!(!server.send_msg(id, PING, b"gone"));
        assert!(server.connection_info(id).is_none());
    }
    for peer in &peers {
        assert_eq!(peer.poll_next_event(), Some(TransportEvent::Connected(0)));
        assert_eq!(peer.poll_next_event(), Some(TransportEvent::Disconnected(0)));
    }

    // Pumping a stopped server is a no-op.
    assert_eq!(server.pump(), 0);
}

#[test]
fn test_duplicate_connect_keeps_original() {
    let network = MemoryNetwork::new();
    let transport = Arc::new(network.endpoint());
    let mut server = Server::new(transport.clone(), ServerOptions::default(), ServerLog::default());
    let port = server.start_on(0).unwrap();

    let peer = network.endpoint();
    peer.connect("localhost", port).unwrap();
    server.pump();

    transport.inject(TransportEvent::Connected(1));
    server.pump();

    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.hooks().connected, vec![1]);
    assert_eq!(server.connection_info(1), Some(peer.address()));
}

#[test]
fn test_handlers_resolved_at_dispatch_time() {
    let network = MemoryNetwork::new();
    let mut server = Server::without_hooks(Arc::new(network.endpoint()), ServerOptions::default());
    let port = server.start_on(0).unwrap();

    let peer = network.endpoint();
    peer.connect("localhost", port).unwrap();
    server.pump();

    let hits: Arc<Mutex<Vec<&'static str>>> = Arc::default();

    // Bound after the connection exists.
    let first = {
        let hits = Arc::clone(&hits);
        handler(move |_| hits.lock().unwrap().push("first"))
    };
    server.register_handler(PING, first.clone());
    peer.send(0, &pack(PING, b"a"));
    server.pump();

    // Replacing takes effect for the next frame.
    {
        let hits = Arc::clone(&hits);
        server.register_handler(PING, handler(move |_| hits.lock().unwrap().push("second")));
    }
    peer.send(0, &pack(PING, b"b"));
    server.pump();

    // A per-connection table shadows the shared one.
    let mut own = HandlerRegistry::new();
    {
        let hits = Arc::clone(&hits);
        own.register(PING, handler(move |_| hits.lock().unwrap().push("own")));
    }
    server.connection_mut(1).unwrap().set_handlers(own);
    peer.send(0, &pack(PING, b"c"));
    server.pump();

    // Unknown types and short frames are dropped without closing the session.
    peer.send(0, &pack(99, b"d"));
    peer.send(0, &[1]);
    server.pump();
    assert_eq!(server.connection_count(), 1);

    assert_eq!(*hits.lock().unwrap(), vec!["first", "second", "own"]);
    assert!(!server.unregister_handler(PING, &first));
}

#[test]
fn test_client_memory_lifecycle() {
    let network = MemoryNetwork::new();
    let mut server = Server::without_hooks(Arc::new(network.endpoint()), ServerOptions::default());
    let port = server.start_on(0).unwrap();

    let options = ClientOptions {
        max_frame_size: 16,
        ..ClientOptions::default()
    };
    let mut client = Client::new(Arc::new(network.endpoint()), options, ClientLog::default());

    // Nothing can be sent before the transport confirms.
    client.connect_to("localhost", port).unwrap();
    assert!(!client.send_msg(PING, b"early"));

    client.pump();
    server.pump();
    assert!(client.is_connected());
    assert_eq!(client.hooks().connected, 1);

    assert!(client.send_msg(PING, b"fits"));
    assert!(!client.send_msg(PING, &[0u8; 32]));
    assert!(!client.send_msg(PING, b""));

    server.disconnect_all();
    client.pump();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.hooks().disconnected, 1);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Position {
    zone: String,
    x: i32,
    y: i32,
}

const MOVE: u16 = 20;
const MOVED: u16 = 21;

#[test]
fn test_json_messages_round_trip() {
    let network = MemoryNetwork::new();
    let mut server = Server::without_hooks(Arc::new(network.endpoint()), ServerOptions::default());
    let port = server.start_on(0).unwrap();

    let received: Arc<Mutex<Vec<(Position, Envelope)>>> = Arc::default();
    {
        let received = Arc::clone(&received);
        server.register_handler(
            MOVE,
            handler(move |msg| {
                let position: Position = msg.read_json().unwrap();
                received.lock().unwrap().push((position.clone(), msg.to_envelope()));
                assert!(msg.connection.send_json(MOVED, &position));
            }),
        );
    }

    let mut client = Client::without_hooks(Arc::new(network.endpoint()), ClientOptions::default());
    let replies: Arc<Mutex<Vec<Position>>> = Arc::default();
    {
        let replies = Arc::clone(&replies);
        client.register_handler(
            MOVED,
            handler(move |msg| replies.lock().unwrap().push(msg.read_json().unwrap())),
        );
    }

    client.connect_to("localhost", port).unwrap();
    client.pump();
    server.pump();

    let position = Position {
        zone: "harbor".to_string(),
        x: -4,
        y: 12,
    };
    assert!(client.send_json(MOVE, &position));
    server.pump();
    client.pump();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, position);
    assert_eq!(received[0].1, Envelope::json(MOVE, &position).unwrap());
    assert_eq!(*replies.lock().unwrap(), vec![position.clone()]);

    // Pushed by the server outside any handler.
    let moved = Position {
        zone: "harbor".to_string(),
        x: 0,
        y: 0,
    };
    assert!(server.send_json(1, MOVED, &moved));
    assert!(!server.send_json(99, MOVED, &moved));
    client.pump();
    assert_eq!(*replies.lock().unwrap(), vec![position, moved]);
}

#[test]
fn test_events_carry_connection_ids() {
    let network = MemoryNetwork::new();
    let server = network.endpoint();
    let port = server.listen(0).unwrap();
    let client = network.endpoint();
    client.connect("localhost", port).unwrap();
    client.send(0, &pack(PING, b"x"));
    client.disconnect(0);

    let mut server_ids = Vec::new();
    while let Some(event) = server.poll_next_event() {
        server_ids.push(event.connection_id());
    }
    assert_eq!(server_ids, vec![1, 1, 1]);

    let mut client_ids = Vec::new();
    while let Some(event) = client.poll_next_event() {
        client_ids.push(event.connection_id());
    }
    assert_eq!(client_ids, vec![0, 0]);
}
