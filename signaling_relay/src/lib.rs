//! WebRTC signaling relay for hardware devices and the parents watching them
//!
//! A device registers under its device id and owns a room; parent apps join
//! that room as observers. The relay then routes the SDP/ICE handshake
//! between them so they can open a direct media session.
//!
//! # Protocol
//!
//! One WebSocket per client, carrying JSON objects with a `type` field.
//!
//! ## Client → relay
//!
//! - `{"type":"register_device","clientType":"hardware_device"|"parent_app","deviceId":"..."}`
//! - `{"type":"connect_device","clientType":"parent_app","deviceId":"..."}`
//! - `{"type":"offer","deviceId":"...",...}` - routed to the room's device
//! - `{"type":"answer","deviceId":"...",...}` - routed to the room's observers
//! - `{"type":"ice_candidate",...}` - device to observers, observer to device
//! - `{"type":"device_status","status":...}` - device to observers
//!
//! ## Relay → client
//!
//! - `connection_established` with `clientId`, right after connect
//! - `registration_confirmed` with `clientId` and `deviceId`
//! - `parent_connected` with `parentId` and `deviceId`, to the device
//! - `device_connected` with `deviceId` and `status: "ready"`, to the parent
//! - `device_disconnected` with `deviceId`, to every observer
//! - `device_status_update` with `deviceId`, `status` and `timestamp`
//! - relayed `offer` / `answer` / `ice_candidate` with an added `from`
//! - `error` with `error` and `timestamp`
//!
//! `GET /health` and `GET /stats` report connection and room counts.
//!
//! # Example
//!
//! ```bash
//! PORT=8080 RUST_LOG=signaling_relay=debug signaling-relay
//! curl http://127.0.0.1:8080/health
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod state;
pub mod sweep;

pub use config::Config;
pub use error::{ClientRequestError, SignalingError};
pub use handler::router;
pub use protocol::{ClientId, ClientMessage, ClientType, DeviceId, ServerMessage};
pub use server::{run, serve};
pub use state::{Delivery, ServerState};
