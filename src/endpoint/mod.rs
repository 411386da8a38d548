//! Server and client endpoints.
//!
//! Both roles share the same shape: a transport, a handler registry, a
//! lifecycle state and a set of hooks, all driven by calling `pump` once per
//! tick from a single thread.

mod client;
mod connection;
mod hooks;
mod server;
mod state;

pub use client::{Client, ClientOptions};
pub use connection::{Connection, ConnectionOwner};
pub use hooks::{ClientHooks, NoHooks, ServerHooks};
pub use server::{Server, ServerOptions};
pub use state::ConnectionState;
