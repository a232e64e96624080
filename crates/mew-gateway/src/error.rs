//! HTTP-facing error rendering. Wraps a [`GatewayError`] with the status
//! code the connection layer maps each [`ErrorCode`] onto (`spec` §7).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mew_error::{ErrorCode, GatewayError};
use serde_json::json;

/// An error surfaced to an HTTP caller, carrying the stable wire code
/// alongside the status the connection layer maps it onto.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl ApiError {
    /// Build an `ApiError` directly from a code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { status: status_for(code), code, message: message.into() }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self { status: status_for(err.code), code: err.code, message: err.message }
    }
}

impl From<mew_auth::AuthError> for ApiError {
    fn from(err: mew_auth::AuthError) -> Self {
        GatewayError::from(err).into()
    }
}

impl From<mew_protocol::ProtocolError> for ApiError {
    fn from(err: mew_protocol::ProtocolError) -> Self {
        let code = err.error_code();
        ApiError::new(code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.code.wire_code(), "message": self.message }));
        (self.status, body).into_response()
    }
}

/// HTTP status the connection layer reports for each stable error code
/// (`spec` §6: "response ... `{error, code}` with HTTP 400/401/429/500").
fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidFormat
        | ErrorCode::MissingKind
        | ErrorCode::CapabilityViolation
        | ErrorCode::UnknownRecipient
        | ErrorCode::StreamSequenceViolation
        | ErrorCode::DuplicateParticipant => StatusCode::BAD_REQUEST,
        ErrorCode::AuthViolation => StatusCode::UNAUTHORIZED,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::HandlerError | ErrorCode::ServerError | ErrorCode::ConfigInvalid => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
