//! The `system/welcome` payload shape.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::participant::ParticipantSummary;
use crate::stream::StreamInfo;

/// Payload of the `system/welcome` envelope sent to a participant immediately
/// after registration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct WelcomePayload {
    /// The connecting participant's own summary.
    pub you: ParticipantSummary,
    /// All currently connected participants, including `you`.
    pub participants: Vec<ParticipantSummary>,
    /// Streams currently active in the space, for late joiners.
    pub active_streams: Vec<StreamInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::default_capabilities;

    #[test]
    fn serializes_with_expected_keys() {
        let payload = WelcomePayload {
            you: ParticipantSummary::new("alice", default_capabilities()),
            participants: vec![ParticipantSummary::new("alice", default_capabilities())],
            active_streams: vec![],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("you").is_some());
        assert!(json.get("participants").is_some());
        assert!(json.get("active_streams").is_some());
    }
}
