//! # Relay Hub - Telemetry Fan-out for Mobile Devices
//!
//! A WebSocket hub that mobile devices connect to in order to register
//! themselves, opt in to sharing, and stream GPS and IMU samples. Every
//! relayed event is fanned out to all connected peers and forwarded, one per
//! tick, to an aggregation backend over HTTP.
//!
//! ## Architecture Overview
//!
//! * **Dispatcher** - Applies connection events to the session registry
//! * **Broadcast Hub** - Delivers events to every open connection
//! * **Relay Queue & Forwarder** - Bounded, drop-newest queue drained at a fixed tick
//! * **Reaper** - Removes sessions whose reconnect grace period has expired
//!
//! ### Message Flow
//!
//! 1. Device sends a JSON text frame with a `type` tag
//! 2. The connection's reader turns it into a [`HubEvent`] for the hub task
//! 3. The dispatcher updates the registry and decides what to relay
//! 4. Relayed events go to every peer and into the [`RelayQueue`]
//! 5. The [`Forwarder`] hands at most one envelope per tick to the [`BackendSink`]
//!
//! ## Error Handling
//!
//! Nothing a device sends can fail the hub. Malformed frames, frames from
//! unregistered connections and unreachable backends are logged and dropped.
//! [`ServerError`] only surfaces from startup and shutdown.

pub use config::{BackendConfig, HubConfig, DEFAULT_BACKEND_URL};
pub use connection::ConnectionId;
pub use error::ServerError;
pub use messaging::{Dispatcher, HubEvent, InboundMessage, OutboundMessage};
pub use reaper::Reaper;
pub use relay::{BackendSink, Envelope, Forwarder, HttpSink, QueueStats, RelayQueue, SinkError, TickOutcome};
pub use server::RelayServer;
pub use session::{Session, SessionRegistry};

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod reaper;
pub mod relay;
pub mod server;
pub mod session;
