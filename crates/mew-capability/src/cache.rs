//! Caching wrapper around [`CompiledCapabilitySet`]: compiled patterns and
//! allow/deny decisions are memoized by envelope signature. The matcher
//! stays pure; this layer only memoizes.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use mew_core::{CapabilitySet, Envelope};

use crate::matcher::{CompiledCapabilitySet, MatchDecision};

/// Above this many cached decisions the cache is dropped wholesale rather
/// than evicted precisely; a capability set is re-evaluated against a
/// bounded number of distinct envelope shapes in practice; true LRU isn't
/// worth the bookkeeping here.
const MAX_DECISION_ENTRIES: usize = 10_000;

fn fingerprint(value: &serde_json::Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    hasher.finish()
}

fn capability_set_fingerprint(capabilities: &CapabilitySet) -> u64 {
    let values: Vec<&serde_json::Value> = capabilities.iter().map(|c| c.as_value()).collect();
    let mut hasher = DefaultHasher::new();
    for v in values {
        v.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

fn envelope_signature(envelope: &Envelope) -> u64 {
    let value = serde_json::to_value(envelope).unwrap_or(serde_json::Value::Null);
    fingerprint(&value)
}

/// A matcher that precompiles and caches capability sets keyed by their
/// content, and memoizes decisions per `(capability-set, envelope)` pair.
pub struct CapabilityMatcher {
    compiled: Mutex<HashMap<u64, Arc<CompiledCapabilitySet>>>,
    decisions: Mutex<HashMap<(u64, u64), MatchDecision>>,
}

impl Default for CapabilityMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityMatcher {
    /// Build an empty matcher with no cached state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            compiled: Mutex::new(HashMap::new()),
            decisions: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate `envelope` against `capabilities`, compiling and caching the
    /// pattern set on first use and memoizing the decision thereafter.
    #[must_use]
    pub fn evaluate(&self, capabilities: &CapabilitySet, envelope: &Envelope) -> MatchDecision {
        let set_key = capability_set_fingerprint(capabilities);
        let compiled = {
            let mut cache = self.compiled.lock().expect("capability compile cache poisoned");
            cache
                .entry(set_key)
                .or_insert_with(|| Arc::new(CompiledCapabilitySet::compile(capabilities)))
                .clone()
        };

        let envelope_key = envelope_signature(envelope);
        let decision_key = (set_key, envelope_key);
        if let Some(decision) = self
            .decisions
            .lock()
            .expect("capability decision cache poisoned")
            .get(&decision_key)
        {
            return *decision;
        }

        let decision = compiled.evaluate(envelope);
        let mut decisions = self.decisions.lock().expect("capability decision cache poisoned");
        if decisions.len() >= MAX_DECISION_ENTRIES {
            decisions.clear();
        }
        decisions.insert(decision_key, decision);
        decision
    }

    /// Drop every cached compiled pattern set and decision. Callers should
    /// invalidate whenever a participant's capability set changes (a grant
    /// is issued or revoked) so stale fingerprints never collide.
    pub fn invalidate_all(&self) {
        self.compiled.lock().expect("capability compile cache poisoned").clear();
        self.decisions.lock().expect("capability decision cache poisoned").clear();
    }
}
