//! Module Exports
//!
//! This file exports the key modules used in the stream gateway
//! implementation.
//!
//! # Modules
//! - `server`: Manages the HTTP/WebSocket gateway, routes, and frame delivery.
//! - `session`: Per-client session state, registry, and authentication.

pub mod server;
pub mod session;
