//! Observer hooks a space owner calls out to for the ambient persisted
//! state `spec` §6 describes (`envelope-history.jsonl`,
//! `capability-decisions.jsonl`). `mew-router` itself holds no file
//! handles; `mew-gateway` supplies the concrete observer.

use mew_core::{DisconnectReason, Envelope};

/// Side-channel notifications emitted while routing, independent of
/// envelope delivery to participants.
pub trait SpaceObserver: Send + Sync {
    /// Called once per envelope that was accepted into a space's history,
    /// in acceptance order.
    fn on_envelope_recorded(&self, _space: &str, _envelope: &Envelope) {}

    /// Called once per capability authorization decision, successful or
    /// not, for `capability-decisions.jsonl`.
    fn on_capability_decision(
        &self,
        _space: &str,
        _participant: &str,
        _envelope_id: &str,
        _attempted_kind: &str,
        _allowed: bool,
    ) {
    }

    /// Called when a participant is added to the registry.
    fn on_participant_joined(&self, _space: &str, _id: &str) {}

    /// Called when a participant leaves, with the reason.
    fn on_participant_left(&self, _space: &str, _id: &str, _reason: DisconnectReason) {}
}

/// An observer that does nothing, for tests and callers that don't need
/// the persisted-state side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SpaceObserver for NullObserver {}
