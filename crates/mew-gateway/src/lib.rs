// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! mew-gateway
//!
//! The connection layer (`spec` §4.8/§6): an `axum` router wiring
//! WebSocket and HTTP ingress onto the space owners `mew-router` runs,
//! plus the JSONL persistence (`mew-gateway::logs`) and CLI/config
//! plumbing the binary in `src/main.rs` drives.

pub mod error;
pub mod http;
pub mod logs;
pub mod state;
pub mod token;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Assemble the gateway's `axum::Router`: one `Router` built from an
/// `Arc<AppState>`, with tracing and a permissive CORS layer for
/// browser-based participants.
#[must_use]
pub fn build_app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(http::health_handler))
        .route("/participants/{space}/{id}/messages", post(http::post_messages_handler))
        .route("/{space}", get(ws::ws_handler));

    #[cfg(feature = "dev-auth")]
    {
        router = router.route("/auth/token", post(http::issue_token_handler));
    }

    router.layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}
