//! Unified error taxonomy with stable error codes for the MEW gateway.
//!
//! Every gateway-level failure carries a [`ErrorCode`] (a machine-readable,
//! stable tag), a human-readable message, and arbitrary key-value context.
//! [`GatewayError::to_error_payload`] renders the `system/error` envelope
//! payload the router sends back to an offending sender.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed envelopes or schema violations.
    Input,
    /// Token/identity mismatches.
    Auth,
    /// Capability or rate-limit denials.
    Policy,
    /// Recipient resolution or sink delivery failures.
    Delivery,
    /// Stream or grant bookkeeping violations.
    Resource,
    /// Space-ending failures.
    Fatal,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Auth => "auth",
            Self::Policy => "policy",
            Self::Delivery => "delivery",
            Self::Resource => "resource",
            Self::Fatal => "fatal",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// [`ErrorCode::wire_code`] gives the exact snake_case token that goes on the
/// wire in a `system/error` envelope; [`ErrorCode::as_str`] gives a
/// `SCREAMING_SNAKE_CASE` form for logs and internal diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Envelope failed to parse or violates the required-field schema.
    InvalidFormat,
    /// Envelope is missing the required `kind` field.
    MissingKind,
    /// `from` did not match the authenticated connection identity.
    AuthViolation,
    /// Sender's effective capabilities do not authorize the envelope.
    CapabilityViolation,
    /// One or more listed recipients are not present in the space.
    UnknownRecipient,
    /// Sender exceeded its per-minute message budget.
    RateLimited,
    /// `stream/data` sequence number was out of order or duplicated.
    StreamSequenceViolation,
    /// A second live connection attempted to use an already-connected id.
    DuplicateParticipant,
    /// An internal handler failed while processing an otherwise-valid envelope.
    HandlerError,
    /// The space owner encountered a fatal, unrecoverable error.
    ServerError,
    /// Configuration file or value is invalid.
    ConfigInvalid,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidFormat | Self::MissingKind => ErrorCategory::Input,
            Self::AuthViolation => ErrorCategory::Auth,
            Self::CapabilityViolation | Self::RateLimited => ErrorCategory::Policy,
            Self::UnknownRecipient => ErrorCategory::Delivery,
            Self::StreamSequenceViolation | Self::DuplicateParticipant => ErrorCategory::Resource,
            Self::HandlerError => ErrorCategory::Internal,
            Self::ServerError => ErrorCategory::Fatal,
            Self::ConfigInvalid => ErrorCategory::Config,
        }
    }

    /// Stable `SCREAMING_SNAKE_CASE` representation, for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::MissingKind => "MISSING_KIND",
            Self::AuthViolation => "AUTH_VIOLATION",
            Self::CapabilityViolation => "CAPABILITY_VIOLATION",
            Self::UnknownRecipient => "UNKNOWN_RECIPIENT",
            Self::RateLimited => "RATE_LIMITED",
            Self::StreamSequenceViolation => "STREAM_SEQUENCE_VIOLATION",
            Self::DuplicateParticipant => "DUPLICATE_PARTICIPANT",
            Self::HandlerError => "HANDLER_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
        }
    }

    /// Wire-format `snake_case` token used in the `system/error` payload's
    /// `error` field.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "invalid_format",
            Self::MissingKind => "missing_kind",
            Self::AuthViolation => "auth_violation",
            Self::CapabilityViolation => "capability_violation",
            Self::UnknownRecipient => "unknown_recipient",
            Self::RateLimited => "rate_limited",
            Self::StreamSequenceViolation => "stream_sequence_violation",
            Self::DuplicateParticipant => "duplicate_participant",
            Self::HandlerError => "handler_error",
            Self::ServerError => "server_error",
            Self::ConfigInvalid => "config_invalid",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Unified gateway error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source for cause-chaining, and structured context rendered into the
/// `system/error` payload.
///
/// # Examples
///
/// ```
/// use mew_error::{ErrorCode, GatewayError};
///
/// let err = GatewayError::new(ErrorCode::CapabilityViolation, "not authorized")
///     .with_context("attempted_kind", "mcp/request");
/// let payload = err.to_error_payload();
/// assert_eq!(payload["error"], "capability_violation");
/// ```
pub struct GatewayError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context merged into the error payload.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl GatewayError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic/payload context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialization
    /// fails the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Render the `system/error` envelope payload:
    /// `{error, message, attempted_kind?, your_capabilities?}`, with any
    /// other context keys merged in.
    pub fn to_error_payload(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("error".into(), serde_json::json!(self.code.wire_code()));
        obj.insert("message".into(), serde_json::json!(self.message));
        for (k, v) in &self.context {
            obj.insert(k.clone(), v.clone());
        }
        serde_json::Value::Object(obj)
    }
}

impl fmt::Debug for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("GatewayError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
