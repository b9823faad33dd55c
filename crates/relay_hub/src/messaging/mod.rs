//! Message decoding and dispatch.
//!
//! Transport callbacks are funneled into a single [`HubEvent`] stream that the
//! [`Dispatcher`] consumes one event at a time on the hub task.

pub mod dispatcher;
pub mod types;

pub use dispatcher::{Dispatcher, HubEvent};
pub use types::{InboundMessage, OutboundMessage, RegisterRequest, SharingToggle, TelemetrySample};
