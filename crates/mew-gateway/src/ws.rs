//! WebSocket ingress (`spec` §4.8): `GET /<space>` upgrades to a duplex
//! connection, authenticates via [`crate::token::extract_token`], registers
//! the participant, and ferries envelopes between the socket and that
//! space's [`SpaceOwner`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use mew_core::{DisconnectReason, Envelope};
use mew_error::{ErrorCode, GatewayError};
use mew_protocol::EnvelopeCodec;
use mew_registry::ConnectionSink;
use mew_router::{SpaceCommand, SpaceOwner};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::AppState;
use crate::token::extract_token;

/// A live WebSocket connection's outbound side: frames are pushed onto an
/// unbounded channel drained by a dedicated write-loop task, matching the
/// "two logical tasks (read loop, write loop)" model (`spec` §5).
struct WsSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionSink for WsSink {
    fn send(&self, frame: &str) -> bool {
        self.tx.send(Message::Text(frame.to_string().into())).is_ok()
    }

    fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }
}

/// `GET /<space>`: validate the token before upgrading, so a rejected
/// handshake never completes (`spec` §7: auth errors close the connection
/// at handshake time).
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(space): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = extract_token(&headers, &query)
        .ok_or_else(|| ApiError::new(ErrorCode::AuthViolation, "missing bearer token"))?;
    let claims = state
        .auth
        .resolve(&token, &space, state.config.insecure_auth, state.config.default_capabilities.clone(), Utc::now())
        .map_err(GatewayError::from)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, space, claims)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, space: String, claims: mew_auth::Claims) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let sink: Arc<dyn ConnectionSink> = Arc::new(WsSink { tx: tx.clone() });
    let owner = state.space_owner(&space).await;
    let participant_id = claims.participant_id.clone();

    let connected = connect_and_welcome(&owner, &sink, &participant_id, claims.capabilities.clone(), state.config.handshake_timeout).await;
    if !connected {
        let _ = tx.send(Message::Close(None));
        drop(tx);
        let _ = write_task.await;
        return;
    }
    info!(space = %space, participant = %participant_id, "websocket connected");

    while let Some(frame) = receiver.next().await {
        let msg = match frame {
            Ok(m) => m,
            Err(_) => break,
        };
        match msg {
            Message::Text(text) => {
                handle_inbound_text(&state, &owner, &space, &participant_id, &text, sink.as_ref()).await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    let _ = owner.sender.send(SpaceCommand::Disconnect { id: participant_id.clone(), reason: DisconnectReason::Closed }).await;
    debug!(space = %space, participant = %participant_id, "websocket disconnected");
    drop(tx);
    let _ = write_task.await;
}

async fn connect_and_welcome(
    owner: &SpaceOwner,
    sink: &Arc<dyn ConnectionSink>,
    id: &str,
    capabilities: mew_core::CapabilitySet,
    handshake_timeout: std::time::Duration,
) -> bool {
    let (reply_tx, reply_rx) = oneshot::channel();
    let cmd = SpaceCommand::Connect { id: id.to_string(), capabilities, sink: sink.clone(), reply: reply_tx };
    if owner.sender.send(cmd).await.is_err() {
        return false;
    }

    let welcome = match tokio::time::timeout(handshake_timeout, reply_rx).await {
        Ok(Ok(Ok(welcome))) => welcome,
        Ok(Ok(Err(err))) => {
            warn!(participant = %id, error = %err, "connect refused");
            return false;
        }
        _ => {
            warn!(participant = %id, "handshake timed out");
            return false;
        }
    };

    let envelope = Envelope::originate("gateway", "system/welcome", serde_json::to_value(&welcome).unwrap_or_default())
        .to([id.to_string()]);
    if let Ok(frame) = EnvelopeCodec::encode(&envelope) {
        sink.send(&frame);
    }
    true
}

async fn handle_inbound_text(
    state: &AppState,
    owner: &SpaceOwner,
    _space: &str,
    authenticated_id: &str,
    text: &str,
    sink: &dyn ConnectionSink,
) {
    let envelope = match EnvelopeCodec::decode(text, state.config.max_envelope_bytes) {
        Ok(env) => env,
        Err(err) => {
            send_direct_error(sink, GatewayError::new(err.error_code(), err.to_string()), None);
            return;
        }
    };

    if let Err(err) = EnvelopeCodec::check_protocol_tag(&envelope, &state.config.protocol_tag) {
        send_direct_error(sink, GatewayError::new(err.error_code(), err.to_string()), Some(&envelope.id));
        return;
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let cmd = SpaceCommand::Inbound { envelope, authenticated_id: authenticated_id.to_string(), reply: reply_tx };
    if owner.sender.send(cmd).await.is_ok() {
        let _ = reply_rx.await;
    }
}

fn send_direct_error(sink: &dyn ConnectionSink, err: GatewayError, in_reply_to: Option<&str>) {
    let mut envelope = Envelope::originate("gateway", "system/error", err.to_error_payload());
    if let Some(id) = in_reply_to {
        envelope = envelope.correlating([id.to_string()]);
    }
    if let Ok(frame) = EnvelopeCodec::encode(&envelope) {
        sink.send(&frame);
    }
}
