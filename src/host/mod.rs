//! Host lifecycle.
//!
//! Drives endpoints from a tokio interval and handles graceful shutdown.

mod runner;

pub use runner::{run_client, run_server, shutdown_server};
