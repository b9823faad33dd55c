//! Client connection identity.
//!
//! This module defines how individual connections are named and how the hub
//! reaches them once they are open.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Opaque identifier assigned by the transport when a connection is accepted.
///
/// The id is stable for the connection's lifetime and never reused within a
/// process. It serializes as a bare JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out increasing [`ConnectionId`]s, starting at 1.
#[derive(Debug)]
pub struct ConnectionIdAllocator {
    next: AtomicU64,
}

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Reserves the next identifier.
    pub fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Outgoing text frames for one connection.
///
/// The receiving half is drained by the connection's writer task, so queueing
/// a frame never waits on the socket.
pub type PeerSender = mpsc::UnboundedSender<String>;
