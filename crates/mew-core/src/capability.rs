//! Capability patterns: the JSON templates matched structurally against
//! envelopes to decide authorization. Matching behavior lives in
//! `mew-capability`; this module only defines the shape.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single capability pattern: a JSON template matched structurally against
/// an envelope. Supports wildcard/regex/negation strings, array one-of, and
/// object/JSONPath matching; see `spec` §4.2 for the full semantics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(transparent)]
pub struct CapabilityPattern(pub serde_json::Value);

impl CapabilityPattern {
    /// Build a pattern from a simple kind string, e.g. `"chat"` or `"mcp/*"`.
    #[must_use]
    pub fn simple(kind: impl Into<String>) -> Self {
        Self(serde_json::Value::String(kind.into()))
    }

    /// Build a structured pattern from an arbitrary JSON template, e.g.
    /// `{"kind": "mcp/request", "payload": {"method": "tools/call"}}`.
    #[must_use]
    pub fn structured(template: serde_json::Value) -> Self {
        Self(template)
    }

    /// The underlying JSON template.
    #[must_use]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// The meta-capability granting unrestricted capability-granting rights.
    #[must_use]
    pub fn grant_wildcard() -> Self {
        Self::simple("capability/*")
    }
}

/// A participant's capability set: static (from token/config) plus whatever
/// has been dynamically granted at runtime.
pub type CapabilitySet = Vec<CapabilityPattern>;

/// The recommended default capability set for identities without explicit
/// grants: observe everything via `chat`, reply to requests via
/// `mcp/response`, but not initiate privileged operations.
#[must_use]
pub fn default_capabilities() -> CapabilitySet {
    vec![
        CapabilityPattern::simple("chat"),
        CapabilityPattern::simple("mcp/response"),
    ]
}
