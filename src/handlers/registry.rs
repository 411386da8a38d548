//! Handler registry for dispatching messages to callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{NetError, NetResult, ProtocolErrorKind};
use crate::protocol::{MessageType, NetworkMessage};

/// A callback bound to a message type.
///
/// Handlers are compared by `Arc` identity, so keep a clone of the handler
/// around if it needs to be unregistered later.
pub type Handler = Arc<dyn Fn(&NetworkMessage<'_>) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&NetworkMessage<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Mapping from message type to the handlers bound to it.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Vec<Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `msg_type`, replacing whatever was bound before.
    pub fn register(&mut self, msg_type: MessageType, handler: Handler) {
        if self.handlers.contains_key(&msg_type) {
            info!(msg_type, "Replacing handler registration");
        } else {
            debug!(msg_type, "Registering handler");
        }
        self.handlers.insert(msg_type, vec![handler]);
    }

    /// Add `handler` after any handlers already bound to `msg_type`.
    pub fn append(&mut self, msg_type: MessageType, handler: Handler) {
        debug!(msg_type, "Appending handler");
        self.handlers.entry(msg_type).or_default().push(handler);
    }

    /// Remove one binding of `handler` from `msg_type`.
    ///
    /// Returns `false` if the handler was not bound.
    pub fn unregister(&mut self, msg_type: MessageType, handler: &Handler) -> bool {
        let Some(bound) = self.handlers.get_mut(&msg_type) else {
            return false;
        };

        let Some(index) = bound.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return false;
        };

        bound.remove(index);
        if bound.is_empty() {
            self.handlers.remove(&msg_type);
        }
        debug!(msg_type, "Unregistered handler");
        true
    }

    /// Invoke every handler bound to the message's type, in binding order.
    ///
    /// Returns the number of handlers invoked, or `UnknownMessageType` if none
    /// are bound.
    pub fn dispatch(&self, message: &NetworkMessage<'_>) -> NetResult<usize> {
        let bound = self
            .handlers
            .get(&message.msg_type)
            .filter(|bound| !bound.is_empty())
            .ok_or_else(|| {
                NetError::protocol(ProtocolErrorKind::UnknownMessageType {
                    msg_type: message.msg_type,
                })
            })?;

        for handler in bound {
            handler(message);
        }

        Ok(bound.len())
    }

    /// Remove every binding.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Whether any handler is bound to `msg_type`.
    pub fn is_registered(&self, msg_type: MessageType) -> bool {
        self.handler_count(msg_type) > 0
    }

    /// Number of handlers bound to `msg_type`.
    pub fn handler_count(&self, msg_type: MessageType) -> usize {
        self.handlers.get(&msg_type).map_or(0, Vec::len)
    }

    /// List all message types with at least one handler.
    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_types", &self.message_types())
            .finish()
    }
}
