//! HTTP and WebSocket handlers for the signaling relay
//!
//! Every WebSocket connection gets its own reader loop and writer task. The
//! reader handles frames strictly in arrival order; the writer drains the
//! client's outbound queue, which is fed by [`ServerState`].

use crate::error::{ClientRequestError, SignalingError};
use crate::protocol::{ClientId, ClientMessage};
use crate::state::ServerState;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reply sent for frames that do not parse into an envelope
pub const INVALID_MESSAGE_FORMAT: &str = "invalid message format";

/// How long a closing connection may spend flushing frames already queued
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const INFO_PAGE: &str = "WebRTC Signaling Relay\n\
    \n\
    Endpoints:\n\
    - GET /        - WebSocket signaling (also /ws)\n\
    - GET /health  - Liveness and connection counts\n\
    - GET /stats   - Per-room observer counts\n\
    \n\
    Protocol:\n\
    1. Connect; the relay answers {\"type\":\"connection_established\",\"clientId\":...}\n\
    2. Devices send {\"type\":\"register_device\",\"clientType\":\"hardware_device\",\"deviceId\":...}\n\
    3. Parents send {\"type\":\"connect_device\",\"clientType\":\"parent_app\",\"deviceId\":...}\n\
    4. offer / answer / ice_candidate frames are relayed with a \"from\" field\n";

/// Build the relay's router
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(upgrade_or_info))
        .route("/ws", get(upgrade_or_info))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .fallback(not_found)
        .with_state(state)
}

async fn upgrade_or_info(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<ServerState>,
) -> Response {
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        Err(_) => (
            [
                (header::CONTENT_TYPE, "text/plain"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            INFO_PAGE,
        )
            .into_response(),
    }
}

async fn health(State(state): State<ServerState>) -> Response {
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(state.health()),
    )
        .into_response()
}

async fn stats(State(state): State<ServerState>) -> Response {
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(state.stats()),
    )
        .into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        "Not Found",
    )
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let (mut sink, mut stream) = socket.split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<String>();
    let client_id = state.add_client(sender);
    info!(%client_id, "connection established");

    // Ends once the state drops this client's sender, or the socket fails.
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!("write failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match parse_frame(frame) {
            Ok(Some(message)) => dispatch(&state, &client_id, message),
            Ok(None) => {}
            Err(ClientRequestError::Close) => {
                debug!(%client_id, "client sent close");
                break;
            }
            Err(e @ ClientRequestError::WebSocket(_)) => {
                warn!(%client_id, "{e}");
                break;
            }
            Err(e) => {
                warn!(%client_id, "rejecting frame: {e}");
                state.send_error(&client_id, INVALID_MESSAGE_FORMAT);
            }
        }
    }

    state.remove_client(&client_id);
    drain_writer(writer, WRITER_DRAIN_TIMEOUT).await;
    info!(%client_id, "connection closed");
}

/// Wait for a writer whose sender is gone to flush its queue, aborting it if
/// the socket stalls longer than `limit`
async fn drain_writer(mut writer: JoinHandle<()>, limit: Duration) {
    if tokio::time::timeout(limit, &mut writer).await.is_err() {
        debug!("writer did not drain in {limit:?}, aborting");
        writer.abort();
    }
}

/// Turn one transport frame into an envelope; `Ok(None)` for control frames
fn parse_frame(
    frame: Result<Message, axum::Error>,
) -> Result<Option<ClientMessage>, ClientRequestError> {
    let frame = frame.map_err(|e| ClientRequestError::WebSocket(e.to_string()))?;
    let message = match frame {
        Message::Text(text) => text.as_str().parse::<ClientMessage>()?,
        Message::Binary(bytes) => std::str::from_utf8(&bytes)
            .map_err(|_| ClientRequestError::NotUtf8)?
            .parse::<ClientMessage>()?,
        Message::Ping(_) | Message::Pong(_) => return Ok(None),
        Message::Close(_) => return Err(ClientRequestError::Close),
    };
    Ok(Some(message))
}

fn dispatch(state: &ServerState, client_id: &ClientId, message: ClientMessage) {
    debug!(%client_id, kind = message.kind(), "message received");

    let result = match message {
        ClientMessage::RegisterDevice {
            client_type,
            device_id,
        } => state.register(client_id, client_type, device_id),
        ClientMessage::ConnectDevice {
            client_type,
            device_id,
        } => state.connect(client_id, client_type, device_id),
        ClientMessage::Offer(payload) => {
            state.forward_to_device(client_id, payload);
            Ok(())
        }
        ClientMessage::Answer(payload) => {
            state.forward_to_observers(client_id, payload);
            Ok(())
        }
        ClientMessage::IceCandidate(payload) => {
            state.relay_ice_candidate(client_id, payload);
            Ok(())
        }
        ClientMessage::DeviceStatus { status } => {
            state.broadcast_status(client_id, status);
            Ok(())
        }
        ClientMessage::Unknown => {
            info!(%client_id, "ignoring unknown message type");
            Ok(())
        }
    };

    match result {
        Ok(()) => {}
        Err(e @ SignalingError::DeviceNotOnline(_)) => {
            info!(%client_id, "{e}");
            state.send_error(client_id, &e.to_string());
        }
        Err(e) => debug!(%client_id, "{e}"),
    }
}
