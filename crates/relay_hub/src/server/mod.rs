//! WebSocket server: listener, hub task and per-connection handlers.

mod core;
mod handlers;
mod hub;

pub use self::core::RelayServer;
