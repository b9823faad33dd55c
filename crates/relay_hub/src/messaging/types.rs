//! Message type definitions for device-hub communication.
//!
//! Every frame is a JSON object tagged by a `type` field. Inbound telemetry
//! (`GPS`, `IMU`) is relayed verbatim, so its fields are only captured
//! opaquely here; the hub never coerces them.

use crate::connection::ConnectionId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message sent from a device to the hub.
///
/// # Example
///
/// ```json
/// { "type": "REGISTER", "username": "alice", "deviceId": "PHONE-1" }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "REGISTER")]
    Register(RegisterRequest),

    #[serde(rename = "ENABLE_SHARING")]
    EnableSharing(SharingToggle),

    #[serde(rename = "GPS")]
    Gps(TelemetrySample),

    #[serde(rename = "IMU")]
    Imu(TelemetrySample),
}

impl InboundMessage {
    /// Decodes one inbound frame. Unknown `type` tags and missing required
    /// fields are decode errors.
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Payload of a `REGISTER` message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub device_id: String,
}

/// Payload of an `ENABLE_SHARING` message. A missing flag reads as `false`.
#[derive(Debug, Clone, Deserialize)]
pub struct SharingToggle {
    #[serde(default)]
    pub enabled: bool,
}

/// A GPS or IMU sample, kept as its raw field map.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySample {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TelemetrySample {
    /// The `deviceId` the device put in the sample, if it is a string.
    pub fn device_id(&self) -> Option<&str> {
        self.fields.get("deviceId").and_then(Value::as_str)
    }
}

/// Events the hub emits itself, to peers and to the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Unicast acknowledgement to the registering connection
    #[serde(rename = "REGISTERED")]
    Registered {},

    /// Broadcast and forwarded when a device registers
    #[serde(rename = "USER_CONNECTED", rename_all = "camelCase")]
    UserConnected {
        username: String,
        device_id: String,
        connection_id: ConnectionId,
    },

    /// Broadcast and forwarded as soon as a registered connection drops
    #[serde(rename = "USER_DISCONNECT", rename_all = "camelCase")]
    UserDisconnect { username: String, device_id: String },
}

impl OutboundMessage {
    /// Serializes to the wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
