//! The single task that owns all session state.

use crate::messaging::{Dispatcher, HubEvent};
use crate::reaper::Reaper;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Applies connection events in arrival order and sweeps expired sessions on
/// every tick, until `shutdown` fires or every event sender is gone.
///
/// Event handling and sweeps share this one loop, so they never interleave.
pub(crate) async fn run_hub(
    mut dispatcher: Dispatcher,
    reaper: Reaper,
    mut events: mpsc::UnboundedReceiver<HubEvent>,
    tick_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Dispatcher {
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "🕒 Hub task started (tick: {:?}, grace period: {:?})",
        tick_interval,
        reaper.grace_period()
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => dispatcher.dispatch(event, Instant::now()),
                None => {
                    debug!("All event senders dropped");
                    break;
                }
            },
            _ = ticker.tick() => {
                reaper.sweep(dispatcher.registry_mut(), Instant::now());
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }

    info!(
        "🕒 Hub task stopped ({} session(s), {} peer(s))",
        dispatcher.registry().len(),
        dispatcher.peers().peer_count()
    );
    dispatcher
}
