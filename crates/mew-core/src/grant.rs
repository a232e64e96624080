//! Runtime-issued capability grants. Authorization and revocation behavior
//! lives in `mew-router`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityPattern;

/// A recorded `capability/grant`, tracked under the granter for revocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrantRecord {
    /// Envelope id of the `capability/grant` that created this record.
    pub grant_id: String,
    /// Participant id that issued the grant.
    pub granter: String,
    /// Participant id the capability was granted to.
    pub grantee: String,
    /// The capability pattern granted.
    pub pattern: CapabilityPattern,
    /// When the grant was recorded.
    pub created: DateTime<Utc>,
    /// Whether the grantee has sent `capability/grant-ack`.
    pub acknowledged: bool,
}
