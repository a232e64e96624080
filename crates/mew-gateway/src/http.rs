//! HTTP ingress (`spec` §4.8/§6): `GET /health`, `POST
//! /participants/<id>/messages` (with lazy auto-connect for log-backed
//! participants), and the optional development-only `POST /auth/token`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use chrono::Utc;
use mew_core::{CapabilitySet, Envelope};
use mew_error::ErrorCode;
use mew_protocol::EnvelopeCodec;
use mew_registry::ConnectionSink;
use mew_router::{SpaceCommand, SpaceOwner};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::error::ApiError;
use crate::logs::LogSink;
use crate::state::AppState;
use crate::token::extract_token;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    protocol: String,
}

/// `GET /health` → `{status, uptime, protocol}`.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        protocol: state.config.protocol_tag.clone(),
    })
}

/// `POST /participants/<space>/<id>/messages`: bearer-authenticated
/// submission of one envelope or a `{messages: [...]}` batch. The first
/// call from a participant with no live WebSocket lazily registers it as a
/// log-backed virtual connection.
pub async fn post_messages_handler(
    State(state): State<Arc<AppState>>,
    Path((space, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<Value>, ApiError> {
    if body.len() > state.config.max_envelope_bytes {
        return Err(ApiError::new(
            ErrorCode::InvalidFormat,
            format!("body of {} bytes exceeds the {}-byte cap", body.len(), state.config.max_envelope_bytes),
        ));
    }

    let token = extract_token(&headers, &HashMap::new())
        .ok_or_else(|| ApiError::new(ErrorCode::AuthViolation, "missing bearer token"))?;
    let claims = state
        .auth
        .resolve(&token, &space, state.config.insecure_auth, state.config.default_capabilities.clone(), Utc::now())
        .map_err(mew_error::GatewayError::from)?;
    if claims.participant_id != id {
        return Err(ApiError::new(
            ErrorCode::AuthViolation,
            format!("token is bound to '{}', not '{id}'", claims.participant_id),
        ));
    }

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(ErrorCode::InvalidFormat, format!("invalid JSON body: {e}")))?;
    let objects = extract_envelope_objects(&value)?;

    let owner = state.space_owner(&space).await;
    ensure_connected(&state, &owner, &space, &id, claims.capabilities.clone()).await?;

    let mut sent = 0usize;
    for obj in &objects {
        let envelope = match EnvelopeCodec::decode_object(obj) {
            Ok(env) => env,
            Err(_) => continue,
        };
        if EnvelopeCodec::check_protocol_tag(&envelope, &state.config.protocol_tag).is_err() {
            continue;
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = SpaceCommand::Inbound { envelope, authenticated_id: id.clone(), reply: reply_tx };
        if owner.sender.send(cmd).await.is_ok() {
            let _ = reply_rx.await;
            sent += 1;
        }
    }

    Ok(Json(json!({"success": true, "sent": sent, "timestamp": Utc::now().to_rfc3339()})))
}

/// Accept either a single envelope object or `{messages: [...]}`
/// (`spec` §4.8).
fn extract_envelope_objects(value: &Value) -> Result<Vec<serde_json::Map<String, Value>>, ApiError> {
    if let Some(messages) = value.get("messages").and_then(Value::as_array) {
        return Ok(messages.iter().filter_map(Value::as_object).cloned().collect());
    }
    value
        .as_object()
        .cloned()
        .map(|obj| vec![obj])
        .ok_or_else(|| ApiError::new(ErrorCode::InvalidFormat, "body must be an envelope object or {messages: [...]}"))
}

/// Register `id` as a log-backed connection if it is not already
/// connected, per the lazy auto-connect rule in `spec` §4.8. A
/// `DuplicateParticipant` reply means a live connection (WebSocket or an
/// earlier POST) already holds this id; that is the steady-state case and
/// not an error here.
async fn ensure_connected(
    state: &AppState,
    owner: &SpaceOwner,
    space: &str,
    id: &str,
    capabilities: CapabilitySet,
) -> Result<(), ApiError> {
    let sink: Arc<dyn ConnectionSink> = Arc::new(LogSink::new(&state.config.logs_dir, space, id));
    let (reply_tx, reply_rx) = oneshot::channel();
    let cmd = SpaceCommand::Connect { id: id.to_string(), capabilities, sink: sink.clone(), reply: reply_tx };
    owner
        .sender
        .send(cmd)
        .await
        .map_err(|_| ApiError::new(ErrorCode::ServerError, "space owner is not accepting commands"))?;

    match reply_rx.await {
        Ok(Ok(welcome)) => {
            let envelope = Envelope::originate("gateway", "system/welcome", serde_json::to_value(&welcome).unwrap_or_default())
                .to([id.to_string()]);
            if let Ok(frame) = EnvelopeCodec::encode(&envelope) {
                sink.send(&frame);
            }
            Ok(())
        }
        Ok(Err(err)) if err.code == ErrorCode::DuplicateParticipant => Ok(()),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(ApiError::new(ErrorCode::ServerError, "space owner dropped the connect reply")),
    }
}

#[cfg(feature = "dev-auth")]
pub use dev_auth::issue_token_handler;

#[cfg(feature = "dev-auth")]
mod dev_auth {
    use super::{ApiError, AppState, Arc, ErrorCode, Json, State, Utc};
    use mew_auth::{Claims, TokenCodec};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Deserialize)]
    pub struct IssueTokenRequest {
        pub participant_id: String,
        pub space: String,
        #[serde(default)]
        pub capabilities: Option<mew_core::CapabilitySet>,
        #[serde(default)]
        pub ttl_minutes: Option<i64>,
    }

    #[derive(Debug, Serialize)]
    pub struct IssueTokenResponse {
        pub token: String,
        pub expires_at: chrono::DateTime<Utc>,
    }

    /// `POST /auth/token` (development only): mint a signed token for local
    /// testing without standing up a full identity provider (`spec` §6).
    pub async fn issue_token_handler(
        State(state): State<Arc<AppState>>,
        Json(req): Json<IssueTokenRequest>,
    ) -> Result<Json<IssueTokenResponse>, ApiError> {
        let secret = state
            .config
            .hmac_secret
            .clone()
            .ok_or_else(|| ApiError::new(ErrorCode::ConfigInvalid, "no hmac_secret configured"))?;
        let codec = TokenCodec::new(secret);
        let now = Utc::now();
        let claims = Claims {
            participant_id: req.participant_id,
            space: req.space,
            capabilities: req.capabilities.unwrap_or_else(|| state.config.default_capabilities.clone()),
            exp: now + chrono::Duration::minutes(req.ttl_minutes.unwrap_or(60)),
        };
        let token = codec.sign(&claims).map_err(mew_error::GatewayError::from)?;
        Ok(Json(IssueTokenResponse { token, expires_at: claims.exp }))
    }
}
