// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! mew-protocol
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Wire format for talking to the gateway over WebSocket text frames or
//! HTTP POST bodies: one JSON [`mew_core::Envelope`] per message.

use chrono::Utc;
use mew_core::Envelope;
use mew_error::ErrorCode;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors arising from envelope decoding, encoding, or structural validation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The input was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field was missing or of the wrong type.
    #[error("missing or invalid required field: {0}")]
    MissingField(String),

    /// The envelope had no `kind` field, reported separately per `spec` §6/§7.
    #[error("missing kind")]
    MissingKind,

    /// The raw input exceeded the configured per-envelope byte cap.
    #[error("envelope of {actual} bytes exceeds the {max_bytes}-byte cap")]
    Oversized {
        /// Configured maximum.
        max_bytes: usize,
        /// Actual size of the rejected input.
        actual: usize,
    },

    /// A kind-specific payload shape requirement was not met.
    #[error("invalid payload for kind {kind}: {reason}")]
    InvalidPayload {
        /// The envelope kind whose payload failed validation.
        kind: String,
        /// Human-readable detail.
        reason: String,
    },

    /// The envelope declared a `protocol` tag the gateway does not speak.
    #[error("protocol tag mismatch: expected {expected}, got {got}")]
    ProtocolMismatch {
        /// Tag this gateway is configured to accept.
        expected: String,
        /// Tag the envelope declared.
        got: String,
    },
}

impl ProtocolError {
    /// Map this decoding/validation failure onto the stable error taxonomy,
    /// for building the `system/error` response.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::MissingKind => ErrorCode::MissingKind,
            _ => ErrorCode::InvalidFormat,
        }
    }
}

/// Stateless codec for decoding/encoding gateway envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Decode a raw JSON-text frame into a fully-formed [`Envelope`],
    /// enforcing the size cap and the required-field schema from `spec` §4.1.
    ///
    /// `id` is filled with a fresh UUID if absent; `ts` is always rewritten
    /// to the current time, per `spec` §4.1's ingress contract.
    pub fn decode(raw: &str, max_bytes: usize) -> Result<Envelope, ProtocolError> {
        if raw.len() > max_bytes {
            return Err(ProtocolError::Oversized {
                max_bytes,
                actual: raw.len(),
            });
        }

        let value: Value = serde_json::from_str(raw)?;
        let obj = value
            .as_object()
            .ok_or_else(|| ProtocolError::MissingField("<envelope must be a JSON object>".into()))?;

        Self::decode_object(obj)
    }

    /// Decode an already-parsed JSON object (used when re-reading history
    /// files, or when the HTTP POST body supplies a `{messages: [...]}` batch).
    pub fn decode_object(obj: &Map<String, Value>) -> Result<Envelope, ProtocolError> {
        let kind = obj
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingKind)?
            .to_string();

        let protocol = required_str(obj, "protocol")?;
        let from = required_str(obj, "from")?;
        let payload = obj.get("payload").cloned().unwrap_or(Value::Null);

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let to = obj.get("to").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        });

        let correlation_id = obj.get("correlation_id").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        });

        let context = obj
            .get("context")
            .and_then(Value::as_str)
            .map(str::to_string);

        let envelope = Envelope {
            protocol,
            id,
            ts: Utc::now(),
            from,
            to,
            kind,
            correlation_id,
            context,
            payload,
        };

        validate_kind_payload(&envelope)?;
        Ok(envelope)
    }

    /// Serialize an envelope deterministically for delivery or log output.
    pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(envelope)?)
    }

    /// Decode every non-blank line of a JSONL history file into envelopes,
    /// for replaying `.mew/logs/envelope-history.jsonl`.
    pub fn decode_history<'a>(
        lines: impl Iterator<Item = &'a str> + 'a,
    ) -> impl Iterator<Item = Result<Envelope, ProtocolError>> + 'a {
        lines.filter(|l| !l.trim().is_empty()).map(|l| Self::decode(l, usize::MAX))
    }

    /// Reject a connection/envelope declaring a `protocol` tag other than
    /// the one this gateway is configured to speak (`spec` §9 Open Questions).
    pub fn check_protocol_tag(envelope: &Envelope, expected: &str) -> Result<(), ProtocolError> {
        if envelope.protocol != expected {
            return Err(ProtocolError::ProtocolMismatch {
                expected: expected.to_string(),
                got: envelope.protocol.clone(),
            });
        }
        Ok(())
    }
}

fn required_str(obj: &Map<String, Value>, key: &str) -> Result<String, ProtocolError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::MissingField(key.to_string()))
}

/// Lightweight kind-specific payload shape checks (`spec` §4.1's
/// "kind-specific payloads"). Business-level validation (capability
/// authorization, stream sequence tracking) lives downstream in
/// `mew-capability`/`mew-stream`/`mew-router`.
fn validate_kind_payload(envelope: &Envelope) -> Result<(), ProtocolError> {
    match envelope.kind.as_str() {
        "stream/data" => {
            let obj = envelope.payload.as_object().ok_or_else(|| invalid(envelope, "payload must be an object"))?;
            if !obj.contains_key("stream_id") {
                return Err(invalid(envelope, "missing stream_id"));
            }
            match obj.get("seq") {
                Some(v) if v.is_u64() => Ok(()),
                _ => Err(invalid(envelope, "missing or non-integer seq")),
            }
        }
        "capability/grant" => {
            let obj = envelope.payload.as_object().ok_or_else(|| invalid(envelope, "payload must be an object"))?;
            if !obj.contains_key("capability") {
                return Err(invalid(envelope, "missing capability pattern"));
            }
            if envelope.to.as_ref().is_none_or(|t| t.is_empty()) {
                return Err(invalid(envelope, "grant must address exactly one target in `to`"));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn invalid(envelope: &Envelope, reason: &str) -> ProtocolError {
    ProtocolError::InvalidPayload {
        kind: envelope.kind.clone(),
        reason: reason.to_string(),
    }
}
