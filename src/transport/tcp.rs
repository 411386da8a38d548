//! TCP transport on top of tokio.
//!
//! Every session gets a reader task and a writer task. Readers push frames into
//! a shared event queue which the pump drains with `poll_next_event`; writers
//! drain a per-session outbound queue fed by `send`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{NetError, NetResult, ProtocolErrorKind};

use super::framing::{read_frame, write_frame};
use super::{ConnectionId, Transport, TransportEvent, CLIENT_CONNECTION_ID};

/// One open session.
struct Peer {
    address: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Peer {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// State shared between the transport and its tasks.
struct Shared {
    events: mpsc::UnboundedSender<TransportEvent>,
    peers: Mutex<HashMap<ConnectionId, Peer>>,
    next_id: AtomicU32,
    max_frame_size: usize,
}

impl Shared {
    fn lock_peers(&self) -> MutexGuard<'_, HashMap<ConnectionId, Peer>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: TransportEvent) {
        // The receiver lives as long as the transport itself.
        let _ = self.events.send(event);
    }

    /// Register a freshly connected stream and start its tasks.
    ///
    /// Must be called from within the runtime.
    fn attach(self: &Arc<Self>, id: ConnectionId, stream: TcpStream, address: String) {
        let (mut reader, mut writer) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        // Hold the lock until the peer is inserted so a task that finishes
        // immediately still finds it in `close`.
        let mut peers = self.lock_peers();
        if let Some(stale) = peers.remove(&id) {
            stale.abort();
        }

        self.emit(TransportEvent::Connected(id));

        let shared = Arc::clone(self);
        let max_frame_size = self.max_frame_size;
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader, max_frame_size).await {
                    Ok(frame) => shared.emit(TransportEvent::Data(id, frame)),
                    Err(NetError::Protocol {
                        kind: ProtocolErrorKind::ConnectionClosed,
                    }) => {
                        debug!(connection_id = id, "Peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(connection_id = id, error = %e, "Read failed, closing connection");
                        break;
                    }
                }
            }
            shared.close(id);
        });

        let shared = Arc::clone(self);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!(connection_id = id, error = %e, "Write failed, closing connection");
                    break;
                }
            }
            shared.close(id);
        });

        peers.insert(
            id,
            Peer {
                address,
                outbound,
                reader: reader_task,
                writer: writer_task,
            },
        );
    }

    /// Close a session and queue its `Disconnected` event.
    fn close(&self, id: ConnectionId) -> bool {
        let Some(peer) = self.lock_peers().remove(&id) else {
            return false;
        };
        peer.abort();
        self.emit(TransportEvent::Disconnected(id));
        true
    }

    fn close_all(&self) {
        let ids: Vec<_> = self.lock_peers().keys().copied().collect();
        for id in ids {
            self.close(id);
        }
    }
}

/// TCP transport.
///
/// Frames are delimited on the stream with a 4-byte length prefix. Server
/// sessions are numbered from 1; the outbound client session is always 0.
pub struct TcpTransport {
    runtime: Handle,
    bind_address: String,
    shared: Arc<Shared>,
    events_rx: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    connector: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Create a transport whose tasks run on `runtime`.
    pub fn new(runtime: Handle, bind_address: impl Into<String>, max_frame_size: usize) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            bind_address: bind_address.into(),
            shared: Arc::new(Shared {
                events,
                peers: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(1),
                max_frame_size,
            }),
            events_rx: Mutex::new(events_rx),
            listener: Mutex::new(None),
            connector: Mutex::new(None),
        }
    }

    /// Create a transport from settings, on the current runtime.
    pub fn from_settings(settings: &Settings) -> NetResult<Self> {
        let runtime = Handle::try_current().map_err(|e| NetError::Transport {
            message: format!("No tokio runtime available: {}", e),
        })?;
        Ok(Self::new(
            runtime,
            settings.server.bind_address.clone(),
            settings.limits.max_frame_size,
        ))
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.shared.lock_peers().len()
    }

    fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, task: Option<JoinHandle<()>>) {
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = std::mem::replace(&mut *slot, task) {
            old.abort();
        }
    }
}

impl Transport for TcpTransport {
    fn listen(&self, port: u16) -> NetResult<u16> {
        let std_listener = std::net::TcpListener::bind((self.bind_address.as_str(), port))
            .map_err(|e| NetError::Transport {
                message: format!("Failed to bind {}:{}: {}", self.bind_address, port, e),
            })?;
        std_listener.set_nonblocking(true)?;
        let bound = std_listener.local_addr()?.port();

        let listener = {
            let _guard = self.runtime.enter();
            TcpListener::from_std(std_listener)?
        };

        let shared = Arc::clone(&self.shared);
        let task = self.runtime.spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(error = %e, "Failed to set TCP_NODELAY");
                        }
                        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                        debug!(connection_id = id, address = %addr, "Accepted connection");
                        shared.attach(id, stream, addr.ip().to_string());
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
        });
        Self::replace_task(&self.listener, Some(task));

        info!(address = %self.bind_address, port = bound, "TCP transport listening");
        Ok(bound)
    }

    fn connect(&self, address: &str, port: u16) -> NetResult<()> {
        let target = format!("{}:{}", address, port);
        let shared = Arc::clone(&self.shared);

        let task = self.runtime.spawn(async move {
            match TcpStream::connect(&target).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "Failed to set TCP_NODELAY");
                    }
                    let remote = stream
                        .peer_addr()
                        .map(|addr| addr.ip().to_string())
                        .unwrap_or(target);
                    shared.attach(CLIENT_CONNECTION_ID, stream, remote);
                }
                Err(e) => {
                    warn!(address = %target, error = %e, "Failed to connect");
                    shared.emit(TransportEvent::Disconnected(CLIENT_CONNECTION_ID));
                }
            }
        });
        Self::replace_task(&self.connector, Some(task));

        Ok(())
    }

    fn disconnect(&self, connection_id: ConnectionId) -> bool {
        if connection_id == CLIENT_CONNECTION_ID {
            Self::replace_task(&self.connector, None);
        }
        self.shared.close(connection_id)
    }

    fn stop(&self) {
        Self::replace_task(&self.listener, None);
        Self::replace_task(&self.connector, None);
        self.shared.close_all();

        // Start clean if the transport is reused.
        let mut events = self.events_rx.lock().unwrap_or_else(|e| e.into_inner());
        while events.try_recv().is_ok() {}
    }

    fn send(&self, connection_id: ConnectionId, frame: &[u8]) -> bool {
        if frame.len() > self.shared.max_frame_size {
            warn!(
                connection_id,
                size = frame.len(),
                max = self.shared.max_frame_size,
                "Frame exceeds transport maximum"
            );
            return false;
        }

        self.shared
            .lock_peers()
            .get(&connection_id)
            .is_some_and(|peer| peer.outbound.send(frame.to_vec()).is_ok())
    }

    fn poll_next_event(&self) -> Option<TransportEvent> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .try_recv()
            .ok()
    }

    fn remote_address(&self, connection_id: ConnectionId) -> Option<String> {
        self.shared
            .lock_peers()
            .get(&connection_id)
            .map(|peer| peer.address.clone())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    async fn next_event(transport: &TcpTransport) -> TransportEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(event) = transport.poll_next_event() {
                return event;
            }
            assert!(Instant::now() < deadline, "timed out waiting for event");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frames_cross_the_socket() {
        let server = TcpTransport::new(Handle::current(), "127.0.0.1", 1024);
        let client = TcpTransport::new(Handle::current(), "127.0.0.1", 1024);

        let port = server.listen(0).unwrap();
        client.connect("127.0.0.1", port).unwrap();

        assert_eq!(next_event(&client).await, TransportEvent::Connected(0));
        let TransportEvent::Connected(id) = next_event(&server).await else {
            panic!("expected Connected");
        };
        assert!(id >= 1);
        assert_eq!(server.remote_address(id).as_deref(), Some("127.0.0.1"));

        assert!(client.send(0, b"\x07\x00ping"));
        assert_eq!(
            next_event(&server).await,
            TransportEvent::Data(id, b"\x07\x00ping".to_vec())
        );

        assert!(server.disconnect(id));
        assert_eq!(next_event(&server).await, TransportEvent::Disconnected(id));
        assert_eq!(next_event(&client).await, TransportEvent::Disconnected(0));
        assert!(!server.send(id, b"late"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connect_refused_reports_disconnect() {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let client = TcpTransport::new(Handle::current(), "127.0.0.1", 1024);
        client.connect("127.0.0.1", port).unwrap();

        assert_eq!(next_event(&client).await, TransportEvent::Disconnected(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_oversized_frame_rejected() {
        let server = TcpTransport::new(Handle::current(), "127.0.0.1", 8);
        let client = TcpTransport::new(Handle::current(), "127.0.0.1", 8);
        let port = server.listen(0).unwrap();
        client.connect("127.0.0.1", port).unwrap();
        assert_eq!(next_event(&client).await, TransportEvent::Connected(0));

        assert!(!client.send(0, &[0u8; 9]));
        assert!(client.send(0, &[0u8; 8]));
    }
}
