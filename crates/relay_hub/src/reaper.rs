//! Removal of sessions whose reconnect grace period has run out.

use crate::session::{Session, SessionRegistry};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Sweeps disconnect-pending sessions out of the registry.
///
/// Runs on the hub task's tick, never concurrently with event handling.
/// Removal is silent towards peers: they were already told about the
/// disconnect when it happened.
#[derive(Debug, Clone, Copy)]
pub struct Reaper {
    grace_period: Duration,
}

impl Reaper {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Removes every session pending for strictly longer than the grace
    /// period and returns them.
    pub fn sweep(&self, registry: &mut SessionRegistry, now: Instant) -> Vec<Session> {
        let reaped = registry.sweep_expired(now, self.grace_period);
        for session in &reaped {
            info!(
                "🧹 Session for {} ({}) on connection {} expired after grace period",
                session.username, session.device_id, session.connection_id
            );
        }
        reaped
    }
}
