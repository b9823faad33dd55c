//! Periodic drain of the relay queue into the backend sink.

use crate::relay::{BackendSink, RelayQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What a single forwarder tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing queued
    Idle,
    /// Backend link known down; queue left untouched
    LinkDown,
    /// One envelope accepted by the sink
    Delivered,
    /// One envelope consumed but not delivered; it is not retried
    Failed,
}

/// Delivers at most one envelope per tick, at-most-once.
pub struct Forwarder {
    queue: Arc<RelayQueue>,
    sink: Arc<dyn BackendSink>,
    delivery_timeout: Duration,
}

impl Forwarder {
    /// `delivery_timeout` must be shorter than the tick interval the
    /// forwarder is run with, so one stuck delivery cannot swallow the next tick.
    pub fn new(queue: Arc<RelayQueue>, sink: Arc<dyn BackendSink>, delivery_timeout: Duration) -> Self {
        Self {
            queue,
            sink,
            delivery_timeout,
        }
    }

    /// Runs one delivery attempt.
    pub async fn tick(&self) -> TickOutcome {
        if self.queue.is_empty() {
            return TickOutcome::Idle;
        }
        if !self.sink.is_link_up() {
            debug!("🔌 Backend link down, {} envelope(s) waiting", self.queue.len());
            return TickOutcome::LinkDown;
        }
        let Some(envelope) = self.queue.dequeue() else {
            return TickOutcome::Idle;
        };

        match timeout(self.delivery_timeout, self.sink.deliver(&envelope)).await {
            Ok(Ok(())) => TickOutcome::Delivered,
            Ok(Err(e)) => {
                warn!("❌ Error forwarding to backend: {}", e);
                TickOutcome::Failed
            }
            Err(_) => {
                self.sink.on_timeout();
                warn!(
                    "⏱️ Backend delivery exceeded {:?}, envelope discarded",
                    self.delivery_timeout
                );
                TickOutcome::Failed
            }
        }
    }

    /// Ticks every `tick_interval` until `shutdown` fires.
    pub async fn run(self, tick_interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("📡 Forwarder started (tick: {:?}, timeout: {:?})", tick_interval, self.delivery_timeout);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        let stats = self.queue.stats();
        info!(
            "📡 Forwarder stopped ({} envelope(s) left, {} accepted, {} dropped)",
            self.queue.len(),
            stats.accepted,
            stats.dropped
        );
    }
}
