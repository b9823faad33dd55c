//! Connection identity and per-connection plumbing.
//!
//! Every accepted WebSocket gets a [`ConnectionId`] from a process-wide
//! counter, and a [`PeerSender`] through which the hub task queues outgoing
//! frames for that connection's writer task.

pub mod client;

pub use client::{ConnectionId, ConnectionIdAllocator, PeerSender};
