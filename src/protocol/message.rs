//! Message types: the decoded envelope and the view handed to handlers.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::endpoint::Connection;
use crate::error::NetResult;

use super::wire::{pack, unpack};
use super::MessageType;

/// An owned (type, payload) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message type used as the dispatch key.
    pub msg_type: MessageType,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(msg_type: MessageType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    /// Create an envelope whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize>(msg_type: MessageType, value: &T) -> NetResult<Self> {
        Ok(Self::new(msg_type, serde_json::to_vec(value)?))
    }

    /// Decode an envelope from a frame.
    pub fn from_frame(frame: &[u8]) -> NetResult<Self> {
        let (msg_type, payload) = unpack(frame)?;
        Ok(Self::new(msg_type, payload))
    }

    /// Encode this envelope into a frame.
    pub fn to_frame(&self) -> Vec<u8> {
        pack(self.msg_type, &self.payload)
    }
}

/// An incoming message as seen by a handler.
///
/// Borrows the payload from the received frame and the connection it arrived
/// on, so handlers can reply with [`Connection::send_msg`].
#[derive(Debug, Clone, Copy)]
pub struct NetworkMessage<'a> {
    pub msg_type: MessageType,
    pub payload: &'a [u8],
    pub connection: &'a Connection,
}

impl<'a> NetworkMessage<'a> {
    pub fn new(msg_type: MessageType, payload: &'a [u8], connection: &'a Connection) -> Self {
        Self {
            msg_type,
            payload,
            connection,
        }
    }

    /// Deserialize the payload as JSON.
    pub fn read_json<T: DeserializeOwned>(&self) -> NetResult<T> {
        Ok(serde_json::from_slice(self.payload)?)
    }

    /// Copy this message into an owned envelope.
    pub fn to_envelope(&self) -> Envelope {
        Envelope::new(self.msg_type, self.payload)
    }
}
