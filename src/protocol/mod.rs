//! Wire protocol module.
//!
//! Defines the typed message envelope and how it is framed for a transport.
//!
//! ## Wire Format
//!
//! ```text
//! [2 bytes: message type (little-endian u16)][payload]
//! ```
//!
//! Frame boundaries are the transport's job; see [`crate::transport::framing`]
//! for how the TCP transport delimits frames on a byte stream.

mod message;
mod wire;

/// Identifies a message schema; the dispatch key for handlers.
pub type MessageType = u16;

pub use message::{Envelope, NetworkMessage};
pub use wire::{pack, unpack, HEADER_LEN};
