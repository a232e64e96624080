//! Shared bearer-token extraction for the WebSocket and HTTP-POST ingress
//! paths (`spec` §4.8: "token via Authorization header or query parameter").

use std::collections::HashMap;

use axum::http::HeaderMap;

/// Pull a bearer token out of an `Authorization: Bearer <token>` header,
/// falling back to a `?token=` query parameter.
#[must_use]
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    query.get("token").cloned()
}
