//! Pending-proposal bookkeeping records. Lifecycle behavior (fulfillment
//! detection, expiry timers) lives in `mew-router`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded `mcp/proposal`, awaiting fulfillment or expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalRecord {
    /// Envelope id of the `mcp/proposal` that created this record.
    pub proposal_id: String,
    /// Participant id that submitted the proposal.
    pub proposer: String,
    /// When the proposal was recorded, for expiry-window computation.
    pub created: DateTime<Utc>,
    /// Absolute expiry time (`created` + configured expiry window).
    pub expires_at: DateTime<Utc>,
}

impl ProposalRecord {
    /// Whether this proposal has expired as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_check_respects_the_window() {
        let created = Utc::now();
        let record = ProposalRecord {
            proposal_id: "p1".into(),
            proposer: "alice".into(),
            created,
            expires_at: created + Duration::minutes(5),
        };
        assert!(!record.is_expired_at(created + Duration::minutes(4)));
        assert!(record.is_expired_at(created + Duration::minutes(5)));
        assert!(record.is_expired_at(created + Duration::minutes(6)));
    }
}
