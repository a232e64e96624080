//! Wire-level participant summaries, as they appear in `system/welcome` and
//! `system/presence` payloads. Live connection state (sockets, rate-counter
//! timers, granted-capability bookkeeping) is owned by `mew-registry`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;

/// Public summary of a participant, as exposed to other participants.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ParticipantSummary {
    /// Stable string id, unique within a space.
    pub id: String,
    /// Effective capability set (static + granted) at the time of the summary.
    pub capabilities: CapabilitySet,
}

impl ParticipantSummary {
    /// Build a summary for inclusion in a welcome/presence payload.
    #[must_use]
    pub fn new(id: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self {
            id: id.into(),
            capabilities,
        }
    }
}

/// Reason a participant was removed from the registry, carried on
/// `system/presence` leave events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The participant closed its connection normally.
    Closed,
    /// The connection sink failed (write error, broken pipe).
    SinkError,
    /// The gateway evicted the participant (duplicate id, fatal space error).
    Evicted,
}
