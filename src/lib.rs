//! Relaybus
//!
//! A small message bus over pluggable transports. A [`Server`] accepts
//! connections, a [`Client`] connects to one server, and both dispatch typed
//! frames to handlers registered per message type.
//!
//! [`Server`]: endpoint::Server
//! [`Client`]: endpoint::Client

pub mod config;
pub mod endpoint;
pub mod error;
pub mod handlers;
pub mod host;
pub mod master;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod test_support;
