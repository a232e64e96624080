//! Wire-level stream descriptors, as advertised in `system/welcome` and
//! `stream/open`. State-machine behavior lives in `mew-stream`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Direction of data flow relative to the stream's owner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamDirection {
    /// Data flows toward the owner.
    Inbound,
    /// Data flows from the owner to subscribers.
    Outbound,
    /// Data flows both ways.
    Bidirectional,
}

/// Public descriptor of an active stream, as it appears in
/// `system/welcome.active_streams` and `stream/open`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StreamInfo {
    /// Stream id, unique within the space.
    pub stream_id: String,
    /// Namespace assigned by the gateway: `"<space>/<stream_id>"`.
    pub namespace: String,
    /// Participant id that requested the stream.
    pub owner: String,
    /// Direction of data flow.
    pub direction: StreamDirection,
    /// Gateway-assigned creation time.
    pub created: DateTime<Utc>,
    /// Caller-supplied metadata from the `stream/request` payload.
    pub metadata: serde_json::Value,
}

impl StreamInfo {
    /// Assign the namespace convention: `"<space>/<stream_id>"`.
    #[must_use]
    pub fn namespace_for(space: &str, stream_id: &str) -> String {
        format!("{space}/{stream_id}")
    }
}
