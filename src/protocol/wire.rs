//! Wire format for typed messages.
//!
//! Frames are `[2 bytes little-endian u16 message type][payload]`. There is no
//! length field: the transport delivers whole frames.

use crate::error::{NetError, NetResult, ProtocolErrorKind};

use super::MessageType;

/// Size of the message type header.
pub const HEADER_LEN: usize = 2;

/// Pack a message type and payload into one frame.
pub fn pack(msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&msg_type.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a frame into its message type and payload.
///
/// The payload may be empty. Returns a `FrameTooShort` error if the frame
/// cannot hold the header.
pub fn unpack(frame: &[u8]) -> NetResult<(MessageType, &[u8])> {
    if frame.len() < HEADER_LEN {
        return Err(NetError::protocol(ProtocolErrorKind::FrameTooShort {
            len: frame.len(),
        }));
    }

    let msg_type = MessageType::from_le_bytes([frame[0], frame[1]]);
    Ok((msg_type, &frame[HEADER_LEN..]))
}
