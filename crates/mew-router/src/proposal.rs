//! Proposal bookkeeping (`spec` §4.5): tracks `mcp/proposal` envelopes
//! until a correlating fulfillment arrives or the expiry window elapses.

use chrono::{DateTime, Utc};
use mew_core::{Envelope, ProposalRecord};

use crate::state::SpaceState;

/// Record a newly-routed `mcp/proposal` as pending.
pub fn record_proposal(state: &mut SpaceState, envelope: &Envelope, expiry: chrono::Duration) {
    state.pending_proposals.insert(
        envelope.id.clone(),
        ProposalRecord {
            proposal_id: envelope.id.clone(),
            proposer: envelope.from.clone(),
            created: envelope.ts,
            expires_at: envelope.ts + expiry,
        },
    );
}

/// Check whether `envelope` fulfills any pending proposal via
/// `correlation_id`, and if so, drop the bookkeeping record. A proposal
/// cannot fulfill itself: only non-`mcp/proposal` kinds count.
pub fn try_fulfill(state: &mut SpaceState, envelope: &Envelope) -> Option<String> {
    if envelope.kind == "mcp/proposal" {
        return None;
    }
    let correlation_ids = envelope.correlation_id.as_ref()?;
    let fulfilled = correlation_ids
        .iter()
        .find(|id| state.pending_proposals.contains_key(id.as_str()))
        .cloned()?;
    state.pending_proposals.remove(&fulfilled);
    Some(fulfilled)
}

/// Sweep expired proposals as of `now`, returning one `system/notice`
/// envelope addressed to each expired proposal's proposer.
pub fn expire_due(state: &mut SpaceState, now: DateTime<Utc>) -> Vec<Envelope> {
    let expired: Vec<ProposalRecord> = state
        .pending_proposals
        .values()
        .filter(|p| p.is_expired_at(now))
        .cloned()
        .collect();

    let mut notices = Vec::with_capacity(expired.len());
    for proposal in expired {
        state.pending_proposals.remove(&proposal.proposal_id);
        notices.push(
            Envelope::originate(
                "gateway",
                "system/notice",
                serde_json::json!({
                    "notice": "proposal_expired",
                    "proposal_id": proposal.proposal_id,
                }),
            )
            .to([proposal.proposer]),
        );
    }
    notices
}
