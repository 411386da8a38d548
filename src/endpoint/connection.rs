//! Local representation of one peer endpoint.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::error::{ConnectionErrorKind, NetError, NetResult, ProtocolErrorKind};
use crate::handlers::HandlerRegistry;
use crate::protocol::{pack, unpack, MessageType, NetworkMessage};
use crate::transport::framing::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::{ConnectionId, Transport};

/// Which role created a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOwner {
    Server,
    Client,
}

/// Check an outbound frame against the size rules.
pub(crate) fn check_outbound(len: usize, max_frame_size: usize) -> NetResult<()> {
    if len == 0 {
        return Err(NetError::protocol(ProtocolErrorKind::EmptyPayload));
    }
    if len > max_frame_size {
        return Err(NetError::protocol(ProtocolErrorKind::FrameTooLarge {
            size: len,
            max: max_frame_size,
        }));
    }
    Ok(())
}

/// One peer connection.
///
/// Identity is fixed at creation. Incoming frames enter through
/// [`transport_receive`](Self::transport_receive); outgoing ones leave through
/// [`send`](Self::send) and [`send_msg`](Self::send_msg).
pub struct Connection {
    id: ConnectionId,
    local_id: u32,
    address: String,
    owner: ConnectionOwner,
    transport: Arc<dyn Transport>,
    handlers: Option<HandlerRegistry>,
    max_frame_size: usize,
    log_messages: bool,
    closed: AtomicBool,
}

impl Connection {
    /// Create a connection bound to `transport`.
    pub fn new(
        owner: ConnectionOwner,
        address: impl Into<String>,
        local_id: u32,
        id: ConnectionId,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id,
            local_id,
            address: address.into(),
            owner,
            transport,
            handlers: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_messages: false,
            closed: AtomicBool::new(false),
        }
    }

    /// Limit outgoing frames to `max_frame_size` bytes.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Trace every frame sent or received on this connection.
    pub fn with_message_logging(mut self, enabled: bool) -> Self {
        self.log_messages = enabled;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn owner(&self) -> ConnectionOwner {
        self.owner
    }

    /// Whether `disconnect` has been requested.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Give this connection its own handler table, used instead of the
    /// owner's registry.
    pub fn set_handlers(&mut self, handlers: HandlerRegistry) {
        self.handlers = Some(handlers);
    }

    /// Drop the override table and go back to the owner's registry.
    pub fn clear_handler_override(&mut self) -> Option<HandlerRegistry> {
        self.handlers.take()
    }

    pub fn handler_override(&self) -> Option<&HandlerRegistry> {
        self.handlers.as_ref()
    }

    pub fn handler_override_mut(&mut self) -> Option<&mut HandlerRegistry> {
        self.handlers.as_mut()
    }

    /// Decode one frame and dispatch it.
    ///
    /// Uses the override table if one is set, otherwise `shared`. Failures are
    /// logged and only affect this frame; the returned error is informational.
    pub fn transport_receive(&self, frame: &[u8], shared: &HandlerRegistry) -> NetResult<usize> {
        let (msg_type, payload) = match unpack(frame) {
            Ok(parts) => parts,
            Err(e) => {
                error!(
                    connection_id = self.id,
                    frame = %hex::encode(frame),
                    error = %e,
                    "Failed to unpack frame"
                );
                return Err(e);
            }
        };

        if self.log_messages {
            trace!(
                connection_id = self.id,
                msg_type,
                content = %hex::encode(payload),
                "Received message"
            );
        }

        let registry = self.handlers.as_ref().unwrap_or(shared);
        let message = NetworkMessage::new(msg_type, payload, self);
        registry.dispatch(&message).map_err(|e| {
            warn!(connection_id = self.id, msg_type, error = %e, "Dropping message");
            e
        })
    }

    /// Request the transport to close this session. Repeated calls are no-ops.
    ///
    /// Returns `true` if this call closed an open transport session, in which
    /// case the transport queues a `Disconnected` event for it.
    pub fn disconnect(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let closed = self.transport.disconnect(self.id);
        debug!(connection_id = self.id, closed, "Disconnect requested");
        closed
    }

    /// Send an already packed frame.
    pub fn send(&self, frame: &[u8]) -> bool {
        match self.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(connection_id = self.id, error = %e, "Send rejected");
                false
            }
        }
    }

    /// Pack and send a typed message. Empty payloads are rejected.
    pub fn send_msg(&self, msg_type: MessageType, payload: &[u8]) -> bool {
        if payload.is_empty() {
            warn!(
                connection_id = self.id,
                msg_type,
                error = %NetError::protocol(ProtocolErrorKind::EmptyPayload),
                "Send rejected"
            );
            return false;
        }
        self.send(&pack(msg_type, payload))
    }

    /// Serialize `value` as JSON and send it as a typed message.
    pub fn send_json<T: Serialize>(&self, msg_type: MessageType, value: &T) -> bool {
        match serde_json::to_vec(value) {
            Ok(payload) => self.send_msg(msg_type, &payload),
            Err(e) => {
                error!(connection_id = self.id, msg_type, error = %e, "Failed to serialize message");
                false
            }
        }
    }

    fn try_send(&self, frame: &[u8]) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::connection(ConnectionErrorKind::NotConnected));
        }
        check_outbound(frame.len(), self.max_frame_size)?;

        if self.log_messages {
            trace!(connection_id = self.id, bytes = %hex::encode(frame), "Sending frame");
        }

        if self.transport.send(self.id, frame) {
            Ok(())
        } else {
            Err(NetError::Transport {
                message: format!("transport refused frame for connection {}", self.id),
            })
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("local_id", &self.local_id)
            .field("address", &self.address)
            .field("owner", &self.owner)
            .field("has_handler_override", &self.handlers.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}
