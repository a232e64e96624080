//! The universal message unit exchanged between participants and the gateway.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The protocol version tag this build of the gateway speaks.
pub const PROTOCOL_TAG: &str = "mew/v0.4";

/// A fully-formed envelope, after the gateway has stamped `id`/`ts` on
/// ingress.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Envelope {
    /// Protocol version tag, e.g. `"mew/v0.4"`.
    pub protocol: String,
    /// Unique identifier, assigned by the sender or the gateway on ingress.
    pub id: String,
    /// Gateway-rewritten ingress timestamp, authoritative for ordering.
    pub ts: DateTime<Utc>,
    /// Sender participant id. Must equal the authenticated connection identity.
    pub from: String,
    /// Explicit recipients; `None` or empty means broadcast to the space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,
    /// Hierarchical kind string, e.g. `"chat"`, `"mcp/request"`, `"stream/data"`.
    pub kind: String,
    /// Envelope ids this message responds to or correlates with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Vec<String>>,
    /// Optional namespace grouping related envelopes (a stream, a reasoning run).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Kind-specific structured payload.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Construct a new envelope with a freshly generated id and the current
    /// timestamp, for gateway-originated messages (`system/*`, revocations).
    #[must_use]
    pub fn originate(from: impl Into<String>, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            protocol: PROTOCOL_TAG.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            from: from.into(),
            to: None,
            kind: kind.into(),
            correlation_id: None,
            context: None,
            payload,
        }
    }

    /// Address this envelope to a specific set of recipients.
    #[must_use]
    pub fn to(mut self, recipients: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.to = Some(recipients.into_iter().map(Into::into).collect());
        self
    }

    /// Attach correlation ids (e.g. the proposal/grant this envelope answers).
    #[must_use]
    pub fn correlating(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.correlation_id = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Whether this envelope has no explicit recipient list, meaning
    /// broadcast-to-space.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to.as_ref().is_none_or(|v| v.is_empty())
    }

    /// Whether `id` appears in this envelope's `correlation_id` list.
    #[must_use]
    pub fn correlates_with(&self, id: &str) -> bool {
        self.correlation_id
            .as_ref()
            .is_some_and(|ids| ids.iter().any(|c| c == id))
    }

    /// The top-level segment of a hierarchical kind (`"mcp/request"` -> `"mcp"`).
    #[must_use]
    pub fn kind_base(&self) -> &str {
        self.kind.split('/').next().unwrap_or(&self.kind)
    }
}
