//! Session storage keyed by connection.
//!
//! The registry is a plain owned map. It is only ever touched from the hub
//! task, which serializes connection events and periodic sweeps, so it needs
//! no internal locking.

use crate::connection::ConnectionId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Registration and sharing state for one device connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Connection that registered this session
    pub connection_id: ConnectionId,

    /// Username supplied at registration; not checked for uniqueness
    pub username: String,

    /// Device identifier supplied at registration; not checked for uniqueness
    pub device_id: String,

    /// Last time telemetry was accepted from this session
    pub last_seen: Instant,

    /// Whether telemetry from this session is relayed
    pub sharing_enabled: bool,

    /// Set once the owning connection has closed
    pub disconnect_pending: bool,

    /// When `disconnect_pending` became true
    pub disconnect_time: Option<Instant>,
}

impl Session {
    fn new(connection_id: ConnectionId, username: String, device_id: String, now: Instant) -> Self {
        Self {
            connection_id,
            username,
            device_id,
            last_seen: now,
            sharing_enabled: false,
            disconnect_pending: false,
            disconnect_time: None,
        }
    }

    /// Whether this session's grace period has run out at `now`.
    pub fn is_expired(&self, now: Instant, grace_period: Duration) -> bool {
        match (self.disconnect_pending, self.disconnect_time) {
            (true, Some(at)) => now.saturating_duration_since(at) > grace_period,
            _ => false,
        }
    }

    /// Whether telemetry from this session should be fanned out.
    pub fn is_relaying(&self) -> bool {
        self.sharing_enabled && !self.disconnect_pending
    }
}

/// All known sessions, at most one per connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the session for `connection_id`, replacing any earlier one.
    ///
    /// Re-registration on the same connection silently resets its state,
    /// including the sharing flag.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        username: impl Into<String>,
        device_id: impl Into<String>,
        now: Instant,
    ) -> &Session {
        let session = Session::new(connection_id, username.into(), device_id.into(), now);
        match self.sessions.entry(connection_id) {
            Entry::Occupied(mut entry) => {
                debug!("♻️ Connection {} re-registered, previous session replaced", connection_id);
                entry.insert(session);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(session),
        }
    }

    /// Sets the sharing flag. Returns `false` when no session exists.
    pub fn set_sharing(&mut self, connection_id: ConnectionId, enabled: bool) -> bool {
        match self.sessions.get_mut(&connection_id) {
            Some(session) => {
                session.sharing_enabled = enabled;
                true
            }
            None => {
                debug!("Sharing toggle for unregistered connection {} ignored", connection_id);
                false
            }
        }
    }

    /// Refreshes `last_seen`. Returns `false` when no session exists.
    pub fn touch(&mut self, connection_id: ConnectionId, now: Instant) -> bool {
        match self.sessions.get_mut(&connection_id) {
            Some(session) => {
                session.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Flags the session as disconnect-pending.
    ///
    /// Returns the session only on the transition; an absent or already
    /// pending session yields `None` and is left untouched.
    pub fn mark_disconnecting(&mut self, connection_id: ConnectionId, now: Instant) -> Option<&Session> {
        let session = self.sessions.get_mut(&connection_id)?;
        if session.disconnect_pending {
            return None;
        }
        session.disconnect_pending = true;
        session.disconnect_time = Some(now);
        Some(&*session)
    }

    /// Removes and returns every pending session whose grace period has passed.
    pub fn sweep_expired(&mut self, now: Instant, grace_period: Duration) -> Vec<Session> {
        let expired: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_expired(now, grace_period))
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .collect()
    }

    /// False when no session exists for `connection_id`.
    pub fn is_sharing_enabled(&self, connection_id: ConnectionId) -> bool {
        self.sessions
            .get(&connection_id)
            .map(|session| session.sharing_enabled)
            .unwrap_or(false)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions waiting out their grace period.
    pub fn pending_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|session| session.disconnect_pending)
            .count()
    }
}
