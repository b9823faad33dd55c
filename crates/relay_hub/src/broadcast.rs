//! Event fan-out to connected WebSocket peers.

use crate::connection::{ConnectionId, PeerSender};
use std::collections::HashMap;
use tracing::debug;

/// Open connections the hub can write to.
///
/// Owned by the hub task alongside the session registry. Sending only pushes
/// onto each peer's unbounded channel, so fan-out never waits on a socket.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    peers: HashMap<ConnectionId, PeerSender>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&mut self, connection_id: ConnectionId, sender: PeerSender) {
        self.peers.insert(connection_id, sender);
    }

    /// Returns whether the peer was known.
    pub fn remove_peer(&mut self, connection_id: ConnectionId) -> bool {
        self.peers.remove(&connection_id).is_some()
    }

    /// Queues `text` for a single peer. Returns `false` if the peer is unknown
    /// or its writer has already gone away.
    pub fn send_to(&self, connection_id: ConnectionId, text: &str) -> bool {
        match self.peers.get(&connection_id) {
            Some(sender) => sender.send(text.to_owned()).is_ok(),
            None => false,
        }
    }

    /// Queues `text` for every open peer, the originating one included.
    ///
    /// A peer whose writer is gone is skipped; the rest still receive the
    /// event. Returns how many peers accepted it.
    pub fn broadcast_all(&self, text: &str) -> usize {
        let mut recipients = 0;
        for (connection_id, sender) in &self.peers {
            if sender.send(text.to_owned()).is_ok() {
                recipients += 1;
            } else {
                debug!("Peer {} no longer writable, skipped in broadcast", connection_id);
            }
        }
        recipients
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.peers.contains_key(&connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn peer() -> (PeerSender, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_broadcast_reaches_every_peer() {
        let mut hub = BroadcastHub::new();
        let (tx1, mut rx1) = peer();
        let (tx2, mut rx2) = peer();
        hub.add_peer(ConnectionId(1), tx1);
        hub.add_peer(ConnectionId(2), tx2);

        assert_eq!(hub.broadcast_all("hello"), 2);
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_dead_peer_does_not_block_others() {
        let mut hub = BroadcastHub::new();
        let (tx1, rx1) = peer();
        let (tx2, mut rx2) = peer();
        hub.add_peer(ConnectionId(1), tx1);
        hub.add_peer(ConnectionId(2), tx2);
        drop(rx1);

        assert_eq!(hub.broadcast_all("hello"), 1);
        assert_eq!(rx2.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_send_to_targets_one_peer() {
        let mut hub = BroadcastHub::new();
        let (tx1, mut rx1) = peer();
        let (tx2, mut rx2) = peer();
        hub.add_peer(ConnectionId(1), tx1);
        hub.add_peer(ConnectionId(2), tx2);

        assert!(hub.send_to(ConnectionId(1), "only you"));
        assert!(!hub.send_to(ConnectionId(3), "nobody"));
        assert_eq!(rx1.try_recv().unwrap(), "only you");
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_remove_peer() {
        let mut hub = BroadcastHub::new();
        let (tx, _rx) = peer();
        hub.add_peer(ConnectionId(1), tx);

        assert!(hub.remove_peer(ConnectionId(1)));
        assert!(!hub.remove_peer(ConnectionId(1)));
        assert_eq!(hub.peer_count(), 0);
        assert_eq!(hub.broadcast_all("hello"), 0);
    }
}
