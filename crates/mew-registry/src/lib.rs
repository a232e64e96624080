// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-registry
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The per-space participant registry (`spec` §4.3): who is currently
//! connected, what capabilities they hold, and where to deliver outbound
//! frames. A [`ConnectionSink`] abstracts over a live WebSocket write-loop
//! and a lazily-spawned log-file-backed virtual connection (`spec` §4.9)
//! behind one interface, so the router never has to know which kind it is
//! writing to.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use mew_core::{CapabilitySet, ParticipantSummary};

/// A destination for outbound frames addressed to a single participant.
///
/// Implementations must not block the caller; a WebSocket-backed sink
/// typically wraps an `mpsc` sender into a dedicated write-loop task, and a
/// log-backed sink appends to (and lazily tails) a participant's log file.
pub trait ConnectionSink: Send + Sync {
    /// Deliver one already-serialized frame. Returns `false` if the sink is
    /// no longer reachable (the connection closed, the channel dropped).
    fn send(&self, frame: &str) -> bool;

    /// Best-effort request to tear down the underlying connection.
    fn close(&self);
}

/// One connected participant's registry entry.
pub struct ParticipantEntry {
    id: String,
    capabilities: CapabilitySet,
    sink: Arc<dyn ConnectionSink>,
    connected_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl ParticipantEntry {
    /// The participant's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The participant's current capability set (static plus granted).
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// When this participant connected.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// The timestamp of this participant's last observed activity.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read().expect("last_activity lock poisoned")
    }

    /// Record activity at the current time.
    pub fn touch(&self) {
        *self.last_activity.write().expect("last_activity lock poisoned") = Utc::now();
    }

    /// Deliver a frame to this participant.
    pub fn send(&self, frame: &str) -> bool {
        self.sink.send(frame)
    }

    /// Tear down this participant's connection.
    pub fn close(&self) {
        self.sink.close();
    }

    /// Replace the capability set, e.g. after a grant or revocation.
    fn set_capabilities(&mut self, capabilities: CapabilitySet) {
        self.capabilities = capabilities;
    }
}

/// Error returned when registering a participant that is already connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateParticipant(pub String);

impl std::fmt::Display for DuplicateParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "participant '{}' is already connected", self.0)
    }
}

impl std::error::Error for DuplicateParticipant {}

/// The set of participants currently connected to a single space.
///
/// One instance is owned by that space's `SpaceOwner` task in `mew-router`;
/// nothing here is itself concurrency-safe across spaces, only within one.
#[derive(Default)]
pub struct ParticipantRegistry {
    participants: RwLock<HashMap<String, ParticipantEntry>>,
}

impl ParticipantRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected participant. Fails if `id` is already
    /// registered (`spec` §4.3: duplicate ids are refused, not evicted).
    pub fn add(
        &self,
        id: impl Into<String>,
        capabilities: CapabilitySet,
        sink: Arc<dyn ConnectionSink>,
    ) -> Result<(), DuplicateParticipant> {
        let id = id.into();
        let mut participants = self.participants.write().expect("registry lock poisoned");
        if participants.contains_key(&id) {
            return Err(DuplicateParticipant(id));
        }
        let now = Utc::now();
        participants.insert(
            id.clone(),
            ParticipantEntry {
                id,
                capabilities,
                sink,
                connected_at: now,
                last_activity: RwLock::new(now),
            },
        );
        Ok(())
    }

    /// Remove a participant, e.g. on disconnect. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.participants.write().expect("registry lock poisoned").remove(id).is_some()
    }

    /// Whether `id` is currently connected.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.participants.read().expect("registry lock poisoned").contains_key(id)
    }

    /// The number of currently connected participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.read().expect("registry lock poisoned").len()
    }

    /// Whether the registry currently holds no participants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a frame to one participant by id.
    #[must_use]
    pub fn send_to(&self, id: &str, frame: &str) -> bool {
        match self.participants.read().expect("registry lock poisoned").get(id) {
            Some(entry) => entry.send(frame),
            None => false,
        }
    }

    /// Deliver a frame to every participant except `exclude`.
    pub fn broadcast(&self, frame: &str, exclude: Option<&str>) {
        let participants = self.participants.read().expect("registry lock poisoned");
        for (id, entry) in participants.iter() {
            if Some(id.as_str()) == exclude {
                continue;
            }
            entry.send(frame);
        }
    }

    /// The capability set currently held by `id`, if connected.
    #[must_use]
    pub fn capabilities_of(&self, id: &str) -> Option<CapabilitySet> {
        self.participants
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .map(|e| e.capabilities.clone())
    }

    /// Replace `id`'s capability set, e.g. after a grant takes effect.
    pub fn set_capabilities(&self, id: &str, capabilities: CapabilitySet) -> bool {
        match self.participants.write().expect("registry lock poisoned").get_mut(id) {
            Some(entry) => {
                entry.set_capabilities(capabilities);
                true
            }
            None => false,
        }
    }

    /// Mark `id` as having just been active.
    pub fn touch(&self, id: &str) {
        if let Some(entry) = self.participants.read().expect("registry lock poisoned").get(id) {
            entry.touch();
        }
    }

    /// Wire-facing summaries of every connected participant, for
    /// `system/welcome` and `system/presence`.
    #[must_use]
    pub fn summaries(&self) -> Vec<ParticipantSummary> {
        self.participants
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|e| ParticipantSummary { id: e.id.clone(), capabilities: e.capabilities.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mew_core::CapabilityPattern;
    use std::sync::Mutex;

    struct RecordingSink {
        frames: Mutex<Vec<String>>,
        closed: Mutex<bool>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { frames: Mutex::new(Vec::new()), closed: Mutex::new(false) })
        }
    }

    impl ConnectionSink for RecordingSink {
        fn send(&self, frame: &str) -> bool {
            self.frames.lock().unwrap().push(frame.to_string());
            true
        }

        fn close(&self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn caps() -> CapabilitySet {
        vec![CapabilityPattern::simple("chat")]
    }

    #[test]
    fn add_then_contains() {
        let registry = ParticipantRegistry::new();
        registry.add("alice", caps(), RecordingSink::new()).unwrap();
        assert!(registry.contains("alice"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_id_is_refused() {
        let registry = ParticipantRegistry::new();
        registry.add("alice", caps(), RecordingSink::new()).unwrap();
        let err = registry.add("alice", caps(), RecordingSink::new()).unwrap_err();
        assert_eq!(err, DuplicateParticipant("alice".to_string()));
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = ParticipantRegistry::new();
        registry.add("alice", caps(), RecordingSink::new()).unwrap();
        assert!(registry.remove("alice"));
        assert!(!registry.contains("alice"));
        assert!(!registry.remove("alice"));
    }

    #[test]
    fn send_to_reaches_the_right_sink() {
        let registry = ParticipantRegistry::new();
        let sink = RecordingSink::new();
        registry.add("alice", caps(), sink.clone()).unwrap();
        assert!(registry.send_to("alice", "frame-1"));
        assert_eq!(sink.frames.lock().unwrap().as_slice(), ["frame-1"]);
        assert!(!registry.send_to("bob", "frame-2"));
    }

    #[test]
    fn broadcast_skips_the_excluded_participant() {
        let registry = ParticipantRegistry::new();
        let alice_sink = RecordingSink::new();
        let bob_sink = RecordingSink::new();
        registry.add("alice", caps(), alice_sink.clone()).unwrap();
        registry.add("bob", caps(), bob_sink.clone()).unwrap();
        registry.broadcast("hello", Some("alice"));
        assert!(alice_sink.frames.lock().unwrap().is_empty());
        assert_eq!(bob_sink.frames.lock().unwrap().as_slice(), ["hello"]);
    }

    #[test]
    fn set_capabilities_updates_future_lookups() {
        let registry = ParticipantRegistry::new();
        registry.add("alice", caps(), RecordingSink::new()).unwrap();
        let granted = vec![CapabilityPattern::simple("chat"), CapabilityPattern::simple("mcp/*")];
        assert!(registry.set_capabilities("alice", granted.clone()));
        assert_eq!(registry.capabilities_of("alice"), Some(granted));
    }

    #[test]
    fn summaries_reflect_all_connected_participants() {
        let registry = ParticipantRegistry::new();
        registry.add("alice", caps(), RecordingSink::new()).unwrap();
        registry.add("bob", caps(), RecordingSink::new()).unwrap();
        let mut ids: Vec<String> = registry.summaries().into_iter().map(|s| s.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["alice".to_string(), "bob".to_string()]);
    }
}
