//! Configuration module.
//!
//! Handles loading and validating bus configuration from TOML files.

mod settings;

pub use settings::*;
