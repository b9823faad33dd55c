//! Outbound relay to the aggregation backend.
//!
//! The hub task produces [`Envelope`]s into a bounded [`RelayQueue`] without
//! ever waiting on the network. A [`Forwarder`] running on its own task drains
//! one envelope per tick into a [`BackendSink`], so a slow or unreachable
//! backend only ever costs the forwarder its bounded delivery timeout.

pub mod forwarder;
pub mod queue;
pub mod sink;

pub use forwarder::{Forwarder, TickOutcome};
pub use queue::{Envelope, QueueStats, RelayQueue};
pub use sink::{BackendSink, HttpSink, SinkError};
