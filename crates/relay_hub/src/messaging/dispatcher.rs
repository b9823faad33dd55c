//! Routing of connection events to registry mutations, fan-out and relay.
//!
//! The dispatcher owns the session registry and the broadcast hub. It is
//! driven synchronously from the hub task, which is what lets both of them do
//! without locks.
//!
//! # Message Flow
//!
//! 1. `Connect` adds the peer so it starts receiving broadcasts
//! 2. `Inbound` frames are decoded by their `type` tag and applied
//! 3. Events worth relaying are broadcast to all peers and enqueued for the backend
//! 4. `Disconnect` removes the peer and marks its session for the reaper
//!
//! Nothing here reports errors back to devices. Undecodable frames, frames
//! from unregistered connections and telemetry with sharing off are dropped.

use crate::broadcast::BroadcastHub;
use crate::connection::{ConnectionId, PeerSender};
use crate::messaging::types::{InboundMessage, OutboundMessage, RegisterRequest, TelemetrySample};
use crate::relay::{Envelope, RelayQueue};
use crate::session::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One transport-level occurrence, tagged by kind.
#[derive(Debug)]
pub enum HubEvent {
    /// A WebSocket handshake completed
    Connect {
        connection_id: ConnectionId,
        remote_addr: SocketAddr,
        outbound: PeerSender,
    },
    /// The connection closed; delivered once per connection
    Disconnect { connection_id: ConnectionId },
    /// A text frame arrived
    Inbound {
        connection_id: ConnectionId,
        payload: String,
    },
}

/// Applies [`HubEvent`]s to hub state.
pub struct Dispatcher {
    registry: SessionRegistry,
    peers: BroadcastHub,
    relay: Arc<RelayQueue>,
}

impl Dispatcher {
    pub fn new(relay: Arc<RelayQueue>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            peers: BroadcastHub::new(),
            relay,
        }
    }

    /// Processes one event to completion. Never blocks on I/O.
    pub fn dispatch(&mut self, event: HubEvent, now: Instant) {
        match event {
            HubEvent::Connect {
                connection_id,
                remote_addr,
                outbound,
            } => {
                info!("🔗 Connection {} opened from {}", connection_id, remote_addr);
                self.peers.add_peer(connection_id, outbound);
            }
            HubEvent::Disconnect { connection_id } => self.handle_disconnect(connection_id, now),
            HubEvent::Inbound {
                connection_id,
                payload,
            } => self.handle_inbound(connection_id, payload, now),
        }
    }

    fn handle_inbound(&mut self, connection_id: ConnectionId, payload: String, now: Instant) {
        let message = match InboundMessage::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping undecodable frame from {}: {}", connection_id, e);
                return;
            }
        };

        match message {
            InboundMessage::Register(request) => self.handle_register(connection_id, request, now),
            InboundMessage::EnableSharing(toggle) => {
                if self.registry.set_sharing(connection_id, toggle.enabled) {
                    if let Some(session) = self.registry.get(connection_id) {
                        info!(
                            "📤 Data sharing {} for {}",
                            if toggle.enabled { "enabled" } else { "disabled" },
                            session.username
                        );
                    }
                }
            }
            InboundMessage::Gps(sample) | InboundMessage::Imu(sample) => {
                self.handle_telemetry(connection_id, &sample, payload, now)
            }
        }
    }

    fn handle_register(&mut self, connection_id: ConnectionId, request: RegisterRequest, now: Instant) {
        let session = self
            .registry
            .register(connection_id, request.username, request.device_id, now);
        info!(
            "✅ User registered: {} ({}) on connection {}",
            session.username, session.device_id, connection_id
        );

        let notice = OutboundMessage::UserConnected {
            username: session.username.clone(),
            device_id: session.device_id.clone(),
            connection_id,
        };

        if let Some(ack) = serialize(&OutboundMessage::Registered {}) {
            if !self.peers.send_to(connection_id, &ack) {
                debug!("Registration ack for {} not delivered, peer gone", connection_id);
            }
        }
        self.publish(&notice);
    }

    fn handle_telemetry(&mut self, connection_id: ConnectionId, sample: &TelemetrySample, payload: String, now: Instant) {
        if !self.registry.touch(connection_id, now) {
            debug!("Telemetry from unregistered connection {} dropped", connection_id);
            return;
        }
        let relaying = self
            .registry
            .get(connection_id)
            .map(|session| session.is_relaying())
            .unwrap_or(false);
        if !relaying {
            return;
        }

        let recipients = self.peers.broadcast_all(&payload);
        debug!(
            "📍 Relayed telemetry from {} ({}) to {} peer(s)",
            sample.device_id().unwrap_or("unknown device"),
            connection_id,
            recipients
        );
        self.relay.enqueue(Envelope::new(payload));
    }

    fn handle_disconnect(&mut self, connection_id: ConnectionId, now: Instant) {
        self.peers.remove_peer(connection_id);

        let Some(session) = self.registry.mark_disconnecting(connection_id, now) else {
            info!("🔌 Connection {} closed (never registered)", connection_id);
            return;
        };
        info!(
            "👋 User disconnected: {} ({}), session kept for grace period",
            session.username, session.device_id
        );
        let notice = OutboundMessage::UserDisconnect {
            username: session.username.clone(),
            device_id: session.device_id.clone(),
        };
        self.publish(&notice);
    }

    /// Broadcasts a hub-originated event and enqueues it for the backend.
    fn publish(&self, message: &OutboundMessage) {
        if let Some(text) = serialize(message) {
            self.peers.broadcast_all(&text);
            self.relay.enqueue(Envelope::new(text));
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    pub fn peers(&self) -> &BroadcastHub {
        &self.peers
    }
}

fn serialize(message: &OutboundMessage) -> Option<String> {
    match message.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to serialize {:?}: {}", message, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    const GPS: &str = r#"{"type":"GPS","username":"alice","deviceId":"PHONE-1","timestamp":1700000000,"lat":1.0,"lon":2.0,"alt":10.5,"accuracy":3.0,"speed":0.0}"#;

    struct Harness {
        dispatcher: Dispatcher,
        relay: Arc<RelayQueue>,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            let relay = Arc::new(RelayQueue::new(10));
            Self {
                dispatcher: Dispatcher::new(relay.clone()),
                relay,
                now: Instant::now(),
            }
        }

        fn connect(&mut self, id: u64) -> mpsc::UnboundedReceiver<String> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.dispatcher.dispatch(
                HubEvent::Connect {
                    connection_id: ConnectionId(id),
                    remote_addr: "127.0.0.1:40000".parse().unwrap(),
                    outbound: tx,
                },
                self.now,
            );
            rx
        }

        fn send(&mut self, id: u64, payload: &str) {
            self.dispatcher.dispatch(
                HubEvent::Inbound {
                    connection_id: ConnectionId(id),
                    payload: payload.to_string(),
                },
                self.now,
            );
        }

        fn disconnect(&mut self, id: u64) {
            self.dispatcher.dispatch(
                HubEvent::Disconnect {
                    connection_id: ConnectionId(id),
                },
                self.now,
            );
        }

        fn register(&mut self, id: u64, username: &str, device_id: &str) {
            let frame = json!({"type": "REGISTER", "username": username, "deviceId": device_id});
            self.send(id, &frame.to_string());
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    #[test]
    fn test_register_acks_sender_and_broadcasts_to_all() {
        let mut hub = Harness::new();
        let mut a = hub.connect(1);
        let mut b = hub.connect(2);

        hub.register(1, "alice", "PHONE-1");

        let connected = json!({"type": "USER_CONNECTED", "username": "alice", "deviceId": "PHONE-1", "connectionId": 1});
        assert_eq!(drain(&mut a), vec![json!({"type": "REGISTERED"}), connected.clone()]);
        assert_eq!(drain(&mut b), vec![connected.clone()]);

        let queued: Vec<Value> = hub
            .relay
            .snapshot()
            .iter()
            .map(|e| serde_json::from_str(e.as_str()).unwrap())
            .collect();
        assert_eq!(queued, vec![connected]);
    }

    #[test]
    fn test_malformed_register_is_dropped() {
        let mut hub = Harness::new();
        let mut a = hub.connect(1);

        hub.send(1, r#"{"type":"REGISTER","username":"alice"}"#);
        hub.send(1, "{not json");
        hub.send(1, r#"{"type":"SELFDESTRUCT"}"#);

        assert!(drain(&mut a).is_empty());
        assert!(hub.dispatcher.registry().is_empty());
        assert!(hub.relay.is_empty());
    }

    #[test]
    fn test_telemetry_before_register_is_dropped() {
        let mut hub = Harness::new();
        let mut a = hub.connect(1);

        hub.send(1, GPS);

        assert!(drain(&mut a).is_empty());
        assert!(hub.relay.is_empty());
        assert!(hub.dispatcher.registry().is_empty());
    }

    #[test]
    fn test_telemetry_gated_on_sharing() {
        let mut hub = Harness::new();
        let mut a = hub.connect(1);
        let mut b = hub.connect(2);
        hub.register(1, "alice", "PHONE-1");
        drain(&mut a);
        drain(&mut b);
        while hub.relay.dequeue().is_some() {}

        hub.send(1, GPS);
        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut b).is_empty());
        assert!(hub.relay.is_empty());

        hub.send(1, r#"{"type":"ENABLE_SHARING","enabled":true}"#);
        hub.send(1, GPS);

        // Verbatim to every peer, the sender included.
        assert_eq!(a.try_recv().unwrap(), GPS);
        assert_eq!(b.try_recv().unwrap(), GPS);
        assert_eq!(hub.relay.snapshot(), vec![Envelope::new(GPS)]);

        hub.send(1, r#"{"type":"ENABLE_SHARING","enabled":false}"#);
        hub.send(1, GPS);
        assert!(a.try_recv().is_err());
        assert_eq!(hub.relay.len(), 1);
    }

    #[test]
    fn test_imu_passes_unknown_fields_through() {
        let mut hub = Harness::new();
        let mut a = hub.connect(1);
        hub.register(1, "alice", "PHONE-1");
        hub.send(1, r#"{"type":"ENABLE_SHARING","enabled":true}"#);
        drain(&mut a);

        let imu = r#"{"type":"IMU","deviceId":"PHONE-1","accel":{"x":0,"y":0,"z":9.8},"firmware":"2.1"}"#;
        hub.send(1, imu);
        assert_eq!(a.try_recv().unwrap(), imu);
    }

    #[test]
    fn test_sharing_toggle_from_unknown_connection_is_ignored() {
        let mut hub = Harness::new();
        let _a = hub.connect(1);

        hub.send(1, r#"{"type":"ENABLE_SHARING","enabled":true}"#);

        assert!(!hub.dispatcher.registry().is_sharing_enabled(ConnectionId(1)));
        assert!(hub.dispatcher.registry().is_empty());
    }

    #[test]
    fn test_disconnect_notifies_immediately_and_keeps_session() {
        let mut hub = Harness::new();
        let _a = hub.connect(1);
        let mut b = hub.connect(2);
        hub.register(1, "alice", "PHONE-1");
        drain(&mut b);
        while hub.relay.dequeue().is_some() {}

        hub.disconnect(1);

        let gone = json!({"type": "USER_DISCONNECT", "username": "alice", "deviceId": "PHONE-1"});
        assert_eq!(drain(&mut b), vec![gone]);
        assert_eq!(hub.relay.len(), 1);
        assert!(!hub.dispatcher.peers().contains(ConnectionId(1)));

        let session = hub.dispatcher.registry().get(ConnectionId(1)).unwrap();
        assert!(session.disconnect_pending);

        // A second disconnect for the same connection emits nothing.
        hub.disconnect(1);
        assert!(drain(&mut b).is_empty());
        assert_eq!(hub.relay.len(), 1);
    }

    #[test]
    fn test_disconnect_without_session_is_silent() {
        let mut hub = Harness::new();
        let _a = hub.connect(1);
        let mut b = hub.connect(2);

        hub.disconnect(1);

        assert!(drain(&mut b).is_empty());
        assert!(hub.relay.is_empty());
        assert_eq!(hub.dispatcher.peers().peer_count(), 1);
    }

    #[test]
    fn test_one_session_per_connection() {
        let mut hub = Harness::new();
        let _a = hub.connect(1);
        hub.register(1, "alice", "PHONE-1");
        hub.register(1, "alice", "PHONE-2");

        assert_eq!(hub.dispatcher.registry().len(), 1);
        assert_eq!(
            hub.dispatcher.registry().get(ConnectionId(1)).unwrap().device_id,
            "PHONE-2"
        );
    }
}
