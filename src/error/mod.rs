//! Error types for the message bus.
//!
//! Provides a unified error handling system using thiserror. None of these
//! errors are fatal to a pump: they are logged and the offending frame or
//! event is dropped.

mod types;

pub use types::*;
