//! Message handlers module.
//!
//! A [`HandlerRegistry`] maps message types to callbacks. Each server and
//! client owns one; connections may carry their own override table.

mod registry;

pub use registry::{handler, Handler, HandlerRegistry};
