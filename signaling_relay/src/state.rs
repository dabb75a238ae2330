//! Relay state: connected clients, rooms, and message routing
//!
//! A room is keyed by device id and owned by exactly one device client. Both
//! tables live behind a single lock; outbound frames are queued on the
//! targets' channels while the lock is held so a sender's frames reach each
//! destination in the order they were sent.

use crate::error::SignalingError;
use crate::protocol::{
    ClientId, ClientType, DeviceId, Payload, Readiness, ServerMessage, payload_device_id,
};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Send half of a client's outbound frame queue
pub type ClientSender = mpsc::UnboundedSender<String>;

/// One open connection
#[derive(Debug)]
struct Client {
    sender: ClientSender,
    role: Option<ClientType>,
    device_id: Option<DeviceId>,
    connected_at: DateTime<Utc>,
}

impl Client {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// A device and the observers watching it
#[derive(Debug)]
struct Room {
    device: ClientId,
    observers: HashSet<ClientId>,
    created_at: DateTime<Utc>,
}

/// Outcome of a fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Payload of `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub connections: usize,
    pub rooms: usize,
    /// Seconds since the relay started
    pub uptime: f64,
}

/// One row of `GET /stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub device_id: DeviceId,
    pub parent_clients: usize,
    pub created_at: String,
}

/// Payload of `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub clients: usize,
    pub rooms: Vec<RoomStats>,
}

#[derive(Default, Debug)]
struct InnerState {
    clients: HashMap<ClientId, Client>,
    rooms: HashMap<DeviceId, Room>,
}

impl InnerState {
    /// Queue one frame for one client
    fn send(&self, client_id: &ClientId, message: &ServerMessage) -> Result<(), SignalingError> {
        let client = self
            .clients
            .get(client_id)
            .ok_or(SignalingError::UnknownClient(*client_id))?;
        if !client.is_open() {
            return Err(SignalingError::SendError(format!(
                "connection of {client_id} is closed"
            )));
        }
        client
            .sender
            .send(message.to_string())
            .map_err(|e| SignalingError::SendError(e.to_string()))
    }

    /// Best-effort fan-out; one failing target never blocks the others
    fn deliver<'a>(
        &self,
        targets: impl IntoIterator<Item = &'a ClientId>,
        message: &ServerMessage,
    ) -> Delivery {
        let mut delivery = Delivery::default();
        for target in targets {
            match self.send(target, message) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    debug!(%target, "dropping frame: {e}");
                    delivery.failed += 1;
                }
            }
        }
        delivery
    }

    /// Drops the client's current room membership.
    ///
    /// An owned room is torn down after every observer is told the device
    /// left; an observed room just loses this client.
    fn detach(&mut self, client_id: &ClientId) {
        let Some(device_id) = self
            .clients
            .get(client_id)
            .and_then(|client| client.device_id.clone())
        else {
            return;
        };

        let owns_room = match self.rooms.get_mut(&device_id) {
            Some(room) if room.device == *client_id => true,
            Some(room) => {
                if room.observers.remove(client_id) {
                    debug!(%client_id, %device_id, "observer left room");
                }
                false
            }
            None => false,
        };

        if !owns_room {
            return;
        }
        if let Some(room) = self.rooms.remove(&device_id) {
            let delivery = self.deliver(
                &room.observers,
                &ServerMessage::DeviceDisconnected {
                    device_id: device_id.clone(),
                },
            );
            info!(
                %device_id,
                notified = delivery.delivered,
                failed = delivery.failed,
                "device left, room closed"
            );
        }
    }

    /// Shared cleanup for closed, failed, and swept connections
    fn disconnect(&mut self, client_id: &ClientId) -> Option<Client> {
        self.detach(client_id);
        let client = self.clients.remove(client_id)?;
        let connected_for = Utc::now() - client.connected_at;
        info!(
            %client_id,
            role = ?client.role,
            device_id = ?client.device_id,
            connected_secs = connected_for.num_seconds(),
            "client disconnected"
        );
        Some(client)
    }

    /// Room the client is currently attached to
    fn room_of(&self, client_id: &ClientId) -> Option<(&DeviceId, &Room)> {
        let device_id = self.clients.get(client_id)?.device_id.as_ref()?;
        self.rooms.get_key_value(device_id)
    }
}

/// Shared relay state handle
#[derive(Clone)]
pub struct ServerState {
    inner: Arc<Mutex<InnerState>>,
    started_at: Instant,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Create an empty relay
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InnerState::default())),
            started_at: Instant::now(),
        }
    }

    /// Track a freshly accepted connection and confirm its id to it
    pub fn add_client(&self, sender: ClientSender) -> ClientId {
        let client_id = ClientId::new();
        let mut state = self.inner.lock();
        state.clients.insert(
            client_id,
            Client {
                sender,
                role: None,
                device_id: None,
                connected_at: Utc::now(),
            },
        );
        if let Err(e) = state.send(&client_id, &ServerMessage::ConnectionEstablished { client_id }) {
            debug!(%client_id, "could not confirm connection: {e}");
        }
        client_id
    }

    /// Record the role and device id a client declares.
    ///
    /// Registering again overwrites both, after leaving any current room. A
    /// device registering under a new id opens a room for it; an id that
    /// already has a room keeps its first owner.
    pub fn register(
        &self,
        client_id: &ClientId,
        client_type: ClientType,
        device_id: DeviceId,
    ) -> Result<(), SignalingError> {
        let mut state = self.inner.lock();
        let unchanged = match state.clients.get(client_id) {
            Some(client) => {
                client.role == Some(client_type) && client.device_id.as_ref() == Some(&device_id)
            }
            None => return Err(SignalingError::UnknownClient(*client_id)),
        };

        if !unchanged {
            state.detach(client_id);
        }
        if let Some(client) = state.clients.get_mut(client_id) {
            client.role = Some(client_type);
            client.device_id = Some(device_id.clone());
        }
        info!(%client_id, %client_type, %device_id, "client registered");

        if client_type == ClientType::HardwareDevice {
            match state.rooms.get(&device_id).map(|room| room.device) {
                Some(owner) => warn!(
                    %device_id,
                    %owner,
                    "device id already has an owner, keeping it"
                ),
                None => {
                    state.rooms.insert(
                        device_id.clone(),
                        Room {
                            device: *client_id,
                            observers: HashSet::new(),
                            created_at: Utc::now(),
                        },
                    );
                    info!(%device_id, "room opened");
                }
            }
        }

        state.send(
            client_id,
            &ServerMessage::RegistrationConfirmed {
                client_id: *client_id,
                device_id,
            },
        )
    }

    /// Attach a parent to the room of `device_id` as an observer.
    ///
    /// A successful join makes the caller a `parent_app`, whatever it was
    /// registered as; a device joining another room gives up its own first.
    pub fn connect(
        &self,
        client_id: &ClientId,
        client_type: ClientType,
        device_id: DeviceId,
    ) -> Result<(), SignalingError> {
        let mut state = self.inner.lock();
        if !state.clients.contains_key(client_id) {
            return Err(SignalingError::UnknownClient(*client_id));
        }

        let owner = match state.rooms.get(&device_id) {
            Some(room) => room.device,
            None => return Err(SignalingError::DeviceNotOnline(device_id)),
        };
        if client_type != ClientType::ParentApp {
            debug!(%client_id, %client_type, %device_id, "ignoring join from non-parent");
            return Ok(());
        }
        if owner == *client_id {
            warn!(%client_id, %device_id, "device tried to join its own room");
            return Ok(());
        }

        state.detach(client_id);
        if let Some(client) = state.clients.get_mut(client_id) {
            client.role = Some(ClientType::ParentApp);
            client.device_id = Some(device_id.clone());
        }
        if let Some(room) = state.rooms.get_mut(&device_id) {
            room.observers.insert(*client_id);
        }
        info!(%client_id, %device_id, "parent joined room");

        if let Err(e) = state.send(
            &owner,
            &ServerMessage::ParentConnected {
                parent_id: *client_id,
                device_id: device_id.clone(),
            },
        ) {
            debug!(%owner, "could not notify device: {e}");
        }
        state.send(
            client_id,
            &ServerMessage::DeviceConnected {
                device_id,
                status: Readiness::Ready,
            },
        )
    }

    /// Route an `offer` to the device owning the addressed room
    pub fn forward_to_device(&self, from: &ClientId, payload: Payload) -> Delivery {
        let state = self.inner.lock();
        let Some(room) = payload_device_id(&payload).and_then(|id| state.rooms.get(&id)) else {
            debug!(%from, "offer for a device that is not online");
            return Delivery::default();
        };
        let delivery = state.deliver([&room.device], &ServerMessage::offer(*from, payload));
        debug!(%from, ?delivery, "offer forwarded");
        delivery
    }

    /// Route an `answer` to every observer of the addressed room
    pub fn forward_to_observers(&self, from: &ClientId, payload: Payload) -> Delivery {
        let state = self.inner.lock();
        let Some(room) = payload_device_id(&payload).and_then(|id| state.rooms.get(&id)) else {
            debug!(%from, "answer for a device that is not online");
            return Delivery::default();
        };
        let delivery = state.deliver(&room.observers, &ServerMessage::answer(*from, payload));
        debug!(%from, ?delivery, "answer forwarded");
        delivery
    }

    /// Route an `ice_candidate` through the sender's current room: from the
    /// owning device to every observer, from an observer to the device.
    pub fn relay_ice_candidate(&self, from: &ClientId, payload: Payload) -> Delivery {
        let state = self.inner.lock();
        let Some((device_id, room)) = state.room_of(from) else {
            debug!(%from, "ice candidate from a client outside any room");
            return Delivery::default();
        };
        let role = state.clients.get(from).and_then(|client| client.role);
        let message = ServerMessage::ice_candidate(*from, payload);

        let delivery = if room.device == *from {
            state.deliver(&room.observers, &message)
        } else if role == Some(ClientType::ParentApp) {
            state.deliver([&room.device], &message)
        } else {
            debug!(%from, %device_id, "ice candidate from a device that does not own the room");
            return Delivery::default();
        };
        debug!(%from, %device_id, ?delivery, "ice candidate relayed");
        delivery
    }

    /// Broadcast a device's status to its observers; silent for anyone but the
    /// room's owner.
    pub fn broadcast_status(&self, from: &ClientId, status: Value) -> Delivery {
        let state = self.inner.lock();
        let Some((device_id, room)) = state.room_of(from) else {
            return Delivery::default();
        };
        if room.device != *from {
            debug!(%from, %device_id, "status update from a non-device client");
            return Delivery::default();
        }
        let delivery = state.deliver(
            &room.observers,
            &ServerMessage::DeviceStatusUpdate {
                device_id: device_id.clone(),
                status,
                timestamp: crate::protocol::timestamp(),
            },
        );
        debug!(%device_id, ?delivery, "status broadcast");
        delivery
    }

    /// Reply with an `error` envelope
    pub fn send_error(&self, client_id: &ClientId, text: &str) {
        let state = self.inner.lock();
        if let Err(e) = state.send(client_id, &ServerMessage::error(text)) {
            debug!(%client_id, "could not report error: {e}");
        }
    }

    /// Disconnect cleanup: leave the current room and forget the client.
    ///
    /// Returns `false` if the client was already gone.
    pub fn remove_client(&self, client_id: &ClientId) -> bool {
        self.inner.lock().disconnect(client_id).is_some()
    }

    /// Run disconnect cleanup for every client whose connection has closed
    /// without the close being handled yet. Returns how many were evicted.
    pub fn sweep_closed(&self) -> usize {
        let mut state = self.inner.lock();
        let stale: Vec<ClientId> = state
            .clients
            .iter()
            .filter(|(_, client)| !client.is_open())
            .map(|(id, _)| *id)
            .collect();
        for client_id in &stale {
            info!(%client_id, "evicting closed connection");
            state.disconnect(client_id);
        }
        stale.len()
    }

    /// Liveness snapshot for `GET /health`
    pub fn health(&self) -> HealthSnapshot {
        let state = self.inner.lock();
        HealthSnapshot {
            status: "healthy",
            connections: state.clients.len(),
            rooms: state.rooms.len(),
            uptime: self.started_at.elapsed().as_secs_f64(),
        }
    }

    /// Per-room snapshot for `GET /stats`, ordered by device id
    pub fn stats(&self) -> StatsSnapshot {
        let state = self.inner.lock();
        let mut rooms: Vec<RoomStats> = state
            .rooms
            .iter()
            .map(|(device_id, room)| RoomStats {
                device_id: device_id.clone(),
                parent_clients: room.observers.len(),
                created_at: room.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            })
            .collect();
        rooms.sort_by(|a, b| a.device_id.0.cmp(&b.device_id.0));
        StatsSnapshot {
            clients: state.clients.len(),
            rooms,
        }
    }

    /// Number of tracked connections
    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    /// Number of open rooms
    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    /// Owner and observers of a room, if it exists
    pub fn room_members(&self, device_id: &DeviceId) -> Option<(ClientId, Vec<ClientId>)> {
        let state = self.inner.lock();
        state
            .rooms
            .get(device_id)
            .map(|room| (room.device, room.observers.iter().copied().collect()))
    }
}
