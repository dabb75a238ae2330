//! Error types for the signaling relay

use crate::protocol::{ClientId, DeviceId};
use thiserror::Error;

/// Errors raised by relay operations on the shared state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// No room is registered for the requested device
    #[error("device {0} is not online")]
    DeviceNotOnline(DeviceId),

    /// The client is not (or no longer) tracked by the relay
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    /// The target's connection is already closed
    #[error("failed to send message: {0}")]
    SendError(String),
}

/// Errors from a single inbound client frame
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// Connection was closed
    #[error("Connection closed")]
    Close,

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope has no string `type` field
    #[error("missing message type")]
    MissingType,

    /// Binary frame that is not valid UTF-8
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}
