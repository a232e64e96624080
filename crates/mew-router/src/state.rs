//! Per-space state: everything a single space's owner task holds and
//! mutates under its own serialization (`spec` §5 — "each space has a
//! single logical owner... giving a total order over envelopes per
//! space").

use std::collections::{HashMap, HashSet, VecDeque};

use mew_capability::CapabilityMatcher;
use mew_core::{GrantRecord, ProposalRecord};
use mew_policy::GrantPolicy;
use mew_ratelimit::RateLimiter;
use mew_registry::ParticipantRegistry;
use mew_stream::StreamManager;

/// All mutable state owned by one space.
pub struct SpaceState {
    /// The space's name, used for namespace construction and logging.
    pub name: String,
    /// Currently connected participants and their capability sets.
    pub registry: ParticipantRegistry,
    /// Stream handshake state machine for this space.
    pub streams: StreamManager,
    /// Per-participant rolling rate-limit windows.
    pub rate_limiter: RateLimiter,
    /// Compiled-pattern and decision cache for capability checks.
    pub matcher: CapabilityMatcher,
    /// Grant-authorization policy (stateless; held for reuse of its cache).
    pub grant_policy: GrantPolicy,
    /// Bounded ring buffer of every envelope accepted into this space.
    pub history: VecDeque<mew_core::Envelope>,
    /// Maximum number of envelopes retained in `history`.
    pub history_cap: usize,
    /// Pending `mcp/proposal`s awaiting fulfillment or expiry, by proposal id.
    pub pending_proposals: HashMap<String, ProposalRecord>,
    /// Live grants, by grant id (the `capability/grant` envelope's id).
    pub grants: HashMap<String, GrantRecord>,
    /// Grant ids issued by each granter, for disconnect-time revocation and
    /// the per-participant grant cap.
    pub grants_by_granter: HashMap<String, HashSet<String>>,
    /// Grant ids held by each grantee, for disconnect-time revocation.
    pub grants_by_grantee: HashMap<String, HashSet<String>>,
    /// Maximum number of live grants one granter may issue (`spec` §5).
    pub grant_cap_per_participant: usize,
}

impl SpaceState {
    /// Construct a fresh, empty state for a newly created space.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        history_cap: usize,
        rate_limit_per_min: u32,
        chat_rate_limit_per_min: u32,
        grant_cap_per_participant: usize,
    ) -> Self {
        Self {
            name: name.into(),
            registry: ParticipantRegistry::new(),
            streams: StreamManager::new(),
            rate_limiter: RateLimiter::new(rate_limit_per_min, chat_rate_limit_per_min),
            matcher: CapabilityMatcher::new(),
            grant_policy: GrantPolicy::new(),
            history: VecDeque::new(),
            history_cap,
            pending_proposals: HashMap::new(),
            grants: HashMap::new(),
            grants_by_granter: HashMap::new(),
            grants_by_grantee: HashMap::new(),
            grant_cap_per_participant,
        }
    }

    /// Append an envelope to history, evicting the oldest entry once the
    /// ring buffer is at capacity.
    pub fn record_history(&mut self, envelope: mew_core::Envelope) {
        if self.history.len() >= self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(envelope);
    }

    /// Whether the space has no connected participants and no live
    /// bookkeeping, i.e. it can be safely torn down.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.registry.is_empty() && self.pending_proposals.is_empty() && self.grants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mew_core::Envelope;
    use serde_json::json;

    #[test]
    fn history_evicts_oldest_at_cap() {
        let mut state = SpaceState::new("demo", 2, 120, 60, 256);
        state.record_history(Envelope::originate("a", "chat", json!({"n": 1})));
        state.record_history(Envelope::originate("a", "chat", json!({"n": 2})));
        state.record_history(Envelope::originate("a", "chat", json!({"n": 3})));
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history[0].payload, json!({"n": 2}));
        assert_eq!(state.history[1].payload, json!({"n": 3}));
    }

    #[test]
    fn fresh_space_is_idle() {
        let state = SpaceState::new("demo", 10, 120, 60, 256);
        assert!(state.is_idle());
    }
}
