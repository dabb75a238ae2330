//! Wire envelopes exchanged between the relay and its clients
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound frames
//! parse into [`ClientMessage`], outbound frames are built as [`ServerMessage`]
//! and rendered with `to_string()`.

use crate::error::ClientRequestError;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fields of a routed handshake frame other than `type`, forwarded untouched
pub type Payload = Map<String, Value>;

/// Connection identifier assigned by the relay on accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-supplied device identifier, the room key
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role a connection declares for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// The camera/microphone device that owns a room
    HardwareDevice,
    /// A parent observer watching a device
    ParentApp,
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareDevice => f.write_str("hardware_device"),
            Self::ParentApp => f.write_str("parent_app"),
        }
    }
}

/// Inbound frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    RegisterDevice {
        client_type: ClientType,
        device_id: DeviceId,
    },
    ConnectDevice {
        client_type: ClientType,
        device_id: DeviceId,
    },
    Offer(Payload),
    Answer(Payload),
    IceCandidate(Payload),
    DeviceStatus {
        #[serde(default)]
        status: Value,
    },
    /// Any `type` this relay does not know about
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Name of the variant as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterDevice { .. } => "register_device",
            Self::ConnectDevice { .. } => "connect_device",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice_candidate",
            Self::DeviceStatus { .. } => "device_status",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for ClientMessage {
    type Err = ClientRequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s)?;
        if !value.get("type").is_some_and(Value::is_string) {
            return Err(ClientRequestError::MissingType);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Reads the `deviceId` a routed frame addresses, if it carries a string one
pub fn payload_device_id(payload: &Payload) -> Option<DeviceId> {
    payload
        .get("deviceId")
        .and_then(Value::as_str)
        .map(DeviceId::from)
}

/// Readiness reported to an observer after a successful join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
}

/// Outbound frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    ConnectionEstablished {
        client_id: ClientId,
    },
    RegistrationConfirmed {
        client_id: ClientId,
        device_id: DeviceId,
    },
    ParentConnected {
        parent_id: ClientId,
        device_id: DeviceId,
    },
    DeviceConnected {
        device_id: DeviceId,
        status: Readiness,
    },
    DeviceDisconnected {
        device_id: DeviceId,
    },
    DeviceStatusUpdate {
        device_id: DeviceId,
        status: Value,
        timestamp: String,
    },
    Offer(Payload),
    Answer(Payload),
    IceCandidate(Payload),
    Error {
        error: String,
        timestamp: String,
    },
}

impl ServerMessage {
    /// `error` envelope stamped with the current time
    pub fn error(text: impl Into<String>) -> Self {
        Self::Error {
            error: text.into(),
            timestamp: timestamp(),
        }
    }

    /// Relayed `offer` tagged with its sender
    pub fn offer(from: ClientId, payload: Payload) -> Self {
        Self::Offer(with_sender(from, payload))
    }

    /// Relayed `answer` tagged with its sender
    pub fn answer(from: ClientId, payload: Payload) -> Self {
        Self::Answer(with_sender(from, payload))
    }

    /// Relayed `ice_candidate` tagged with its sender
    pub fn ice_candidate(from: ClientId, payload: Payload) -> Self {
        Self::IceCandidate(with_sender(from, payload))
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Tags a routed payload with its sender, replacing any client-supplied `from`
fn with_sender(from: ClientId, mut payload: Payload) -> Payload {
    payload.insert("from".to_string(), Value::String(from.to_string()));
    payload
}

/// Current UTC time as RFC 3339 with millisecond precision
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
