//! Per-connection device sessions.
//!
//! A session is created by a REGISTER message, carries the device's sharing
//! flag, and outlives its connection by a grace period before the reaper
//! removes it.

pub mod registry;

pub use registry::{Session, SessionRegistry};
