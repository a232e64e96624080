//! The per-envelope routing algorithm (`spec` §4.4): authentication,
//! rate limiting, capability authorization, history, recipient
//! resolution, delivery, and the special-kind engine hooks.

use chrono::Duration;
use mew_core::{Envelope, StreamDirection};
use mew_error::ErrorCode;
use mew_protocol::EnvelopeCodec;
use mew_stream::StreamDataError;

use crate::events::SpaceObserver;
use crate::state::SpaceState;
use crate::{grant, proposal};

/// Outcome of routing one envelope, for callers (tests, the connection
/// layer) that want to observe what happened without re-deriving it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteReport {
    /// Participant ids the envelope was actually delivered to.
    pub delivered_to: Vec<String>,
    /// Recipients listed in `to` that were not connected.
    pub unknown_recipients: Vec<String>,
    /// The error code reported to the sender, if the envelope was dropped
    /// before reaching delivery.
    pub dropped: Option<ErrorCode>,
}

fn send_error(state: &SpaceState, recipient: &str, err: &mew_error::GatewayError, in_reply_to: &str) {
    let envelope = Envelope::originate("gateway", "system/error", err.to_error_payload())
        .to([recipient.to_string()])
        .correlating([in_reply_to.to_string()]);
    if let Ok(frame) = EnvelopeCodec::encode(&envelope) {
        state.registry.send_to(recipient, &frame);
    }
}

fn encode_or_none(envelope: &Envelope) -> Option<String> {
    EnvelopeCodec::encode(envelope).ok()
}

/// Route one inbound envelope through a single space's state.
///
/// `authenticated_id` is the identity bound to the connection that
/// submitted the envelope; `proposal_expiry` configures how long an
/// `mcp/proposal` remains pending.
pub fn route(
    state: &mut SpaceState,
    envelope: Envelope,
    authenticated_id: &str,
    proposal_expiry: Duration,
    observer: &dyn SpaceObserver,
) -> RouteReport {
    // 1. `from` must match the authenticated connection identity.
    if envelope.from != authenticated_id {
        let err = mew_error::GatewayError::new(
            ErrorCode::AuthViolation,
            format!("envelope.from '{}' does not match authenticated id '{authenticated_id}'", envelope.from),
        );
        send_error(state, authenticated_id, &err, &envelope.id);
        return RouteReport { dropped: Some(ErrorCode::AuthViolation), ..Default::default() };
    }

    // 2. Rate limiting.
    let is_chat = envelope.kind_base() == "chat";
    let rate_decision = state.rate_limiter.check(&envelope.from, is_chat);
    if !rate_decision.is_allowed() {
        let err = mew_error::GatewayError::new(ErrorCode::RateLimited, "message rate limit exceeded")
            .with_context("attempted_kind", envelope.kind.clone());
        send_error(state, &envelope.from, &err, &envelope.id);
        return RouteReport { dropped: Some(ErrorCode::RateLimited), ..Default::default() };
    }

    // 3. Capability check against the sender's effective capabilities.
    //
    // `capability/grant-ack` and `capability/revoke` are meta-protocol
    // replies about a grant the sender already holds standing in (as
    // grantee or original granter); they are not gated behind a capability
    // pattern of their own, since a participant can never be granted the
    // right to acknowledge or revoke a grant before the grant itself
    // exists. `grant::acknowledge`/`grant::revoke_explicit` enforce the
    // real authorization (sender must be the grant's own grantee/granter,
    // or hold `capability/*`) once the envelope reaches the grant engine.
    let bypasses_capability_gate =
        matches!(envelope.kind.as_str(), "capability/grant-ack" | "capability/revoke");
    let sender_caps = state.registry.capabilities_of(&envelope.from).unwrap_or_default();
    if !bypasses_capability_gate {
        let decision = state.matcher.evaluate(&sender_caps, &envelope);
        observer.on_capability_decision(&state.name, &envelope.from, &envelope.id, &envelope.kind, decision.is_allowed());
        if !decision.is_allowed() {
            let err = mew_error::GatewayError::new(ErrorCode::CapabilityViolation, "sender's capabilities do not authorize this envelope")
                .with_context("attempted_kind", envelope.kind.clone())
                .with_context("your_capabilities", serde_json::to_value(&sender_caps).unwrap_or_default());
            send_error(state, &envelope.from, &err, &envelope.id);
            return RouteReport { dropped: Some(ErrorCode::CapabilityViolation), ..Default::default() };
        }
    }

    // `id` must be unique within the space's recent history window
    // (`spec` §3). A sender-supplied id colliding with one still in the
    // ring buffer is rejected rather than silently overwriting history.
    if state.history.iter().any(|recorded| recorded.id == envelope.id) {
        let err = mew_error::GatewayError::new(ErrorCode::InvalidFormat, "envelope id collides with one still in history")
            .with_context("id", envelope.id.clone());
        send_error(state, &envelope.from, &err, &envelope.id);
        return RouteReport { dropped: Some(ErrorCode::InvalidFormat), ..Default::default() };
    }

    // Stream data must gate delivery on sequence validity (`spec` §4.7):
    // an out-of-order or duplicate sequence never reaches history or peers.
    if envelope.kind == "stream/data" {
        let stream_id = envelope.payload.get("stream_id").and_then(serde_json::Value::as_str).unwrap_or_default();
        let seq = envelope.payload.get("seq").and_then(serde_json::Value::as_u64).unwrap_or_default();
        if let Err(violation) = state.streams.record_data(stream_id, &envelope.from, seq) {
            let err = mew_error::GatewayError::new(ErrorCode::StreamSequenceViolation, stream_violation_message(violation))
                .with_context("stream_id", stream_id);
            send_error(state, &envelope.from, &err, &envelope.id);
            return RouteReport { dropped: Some(ErrorCode::StreamSequenceViolation), ..Default::default() };
        }
    }

    // `stream/request` is addressed to the gateway itself, not a peer;
    // handle it entirely through the stream engine rather than generic
    // recipient resolution.
    if envelope.kind == "stream/request" {
        return handle_stream_request(state, &envelope);
    }

    // 4. Stamp into history (ts was already rewritten at ingress by the codec).
    state.record_history(envelope.clone());
    observer.on_envelope_recorded(&state.name, &envelope);

    // 5. Recipient resolution.
    let mut report = RouteReport::default();
    let recipients: Vec<String> = match envelope.to.as_deref() {
        Some(explicit) if !explicit.is_empty() => {
            for id in explicit {
                if !state.registry.contains(id) {
                    report.unknown_recipients.push(id.clone());
                }
            }
            explicit.iter().filter(|id| state.registry.contains(id)).cloned().collect()
        }
        _ => state
            .registry
            .summaries()
            .into_iter()
            .map(|s| s.id)
            .filter(|id| id != &envelope.from)
            .collect(),
    };

    if !report.unknown_recipients.is_empty() {
        let err = mew_error::GatewayError::new(ErrorCode::UnknownRecipient, "one or more recipients are not connected")
            .with_context("unknown_recipients", serde_json::to_value(&report.unknown_recipients).unwrap_or_default());
        send_error(state, &envelope.from, &err, &envelope.id);
    }

    // 6. Delivery. A sink that reports failure is dropped from the registry;
    // this does not abort delivery to the remaining recipients.
    if let Some(frame) = encode_or_none(&envelope) {
        let mut dead = Vec::new();
        for id in &recipients {
            if state.registry.send_to(id, &frame) {
                report.delivered_to.push(id.clone());
            } else {
                dead.push(id.clone());
            }
        }
        for id in dead {
            state.registry.remove(&id);
        }
    }

    // 7. Special-kind engines, invoked after routing.
    match envelope.kind.as_str() {
        "mcp/proposal" => proposal::record_proposal(state, &envelope, proposal_expiry),
        "capability/grant" => {
            if let Err(err) = grant::authorize_and_record_grant(state, &envelope) {
                send_error(state, &envelope.from, &err, &envelope.id);
            }
        }
        "capability/grant-ack" => {
            grant::acknowledge(state, &envelope);
        }
        "capability/revoke" => match grant::revoke_explicit(state, &envelope) {
            Ok(notice) => {
                if let Some(targets) = notice.to.clone() {
                    if let Some(frame) = encode_or_none(&notice) {
                        for target in targets {
                            state.registry.send_to(&target, &frame);
                        }
                    }
                }
            }
            Err(err) => send_error(state, &envelope.from, &err, &envelope.id),
        },
        "stream/close" | "stream/complete" | "stream/error" => {
            if let Some(stream_id) = envelope.payload.get("stream_id").and_then(serde_json::Value::as_str) {
                state.streams.close(stream_id);
            }
        }
        _ => {}
    }
    proposal::try_fulfill(state, &envelope);

    report
}

fn handle_stream_request(state: &mut SpaceState, envelope: &Envelope) -> RouteReport {
    let direction = match envelope.payload.get("direction").and_then(serde_json::Value::as_str) {
        Some("inbound") => StreamDirection::Inbound,
        Some("bidirectional") => StreamDirection::Bidirectional,
        _ => StreamDirection::Outbound,
    };
    let metadata = envelope.payload.get("metadata").cloned().unwrap_or(serde_json::Value::Null);
    let info = state.streams.request(&state.name, envelope.from.clone(), direction, metadata);

    state.record_history(envelope.clone());

    let open = Envelope::originate("gateway", "stream/open", serde_json::to_value(&info).unwrap_or_default());
    let mut report = RouteReport::default();
    if let Some(frame) = encode_or_none(&open) {
        for summary in state.registry.summaries() {
            if state.registry.send_to(&summary.id, &frame) {
                report.delivered_to.push(summary.id);
            }
        }
    }
    report
}

fn stream_violation_message(err: StreamDataError) -> String {
    match err {
        StreamDataError::UnknownStream => "unknown stream_id".to_string(),
        StreamDataError::StreamClosed => "stream is already closed".to_string(),
        StreamDataError::SequenceViolation { expected_greater_than, got } => {
            format!("sequence {got} is not greater than last accepted sequence {expected_greater_than}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use mew_core::CapabilityPattern;
    use mew_registry::ConnectionSink;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct RecordingSink(Mutex<Vec<String>>);
    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }
        fn frames(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }
    impl ConnectionSink for RecordingSink {
        fn send(&self, frame: &str) -> bool {
            self.0.lock().unwrap().push(frame.to_string());
            true
        }
        fn close(&self) {}
    }

    fn add(state: &mut SpaceState, id: &str, caps: &[&str]) -> Arc<RecordingSink> {
        let sink = RecordingSink::new();
        state
            .registry
            .add(id, caps.iter().map(|c| CapabilityPattern::simple(*c)).collect(), sink.clone())
            .unwrap();
        sink
    }

    fn expiry() -> Duration {
        Duration::minutes(5)
    }

    #[test]
    fn happy_path_chat_broadcast_excludes_the_sender() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        add(&mut state, "alice", &["chat"]);
        let bob = add(&mut state, "bob", &["chat"]);

        let env = Envelope::originate("alice", "chat", json!({"text": "hi"}));
        let report = route(&mut state, env, "alice", expiry(), &NullObserver);

        assert_eq!(report.delivered_to, vec!["bob".to_string()]);
        assert_eq!(bob.frames().len(), 1);
        assert!(bob.frames()[0].contains("\"from\":\"alice\""));
    }

    #[test]
    fn capability_violation_drops_the_envelope_and_notifies_only_the_sender() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        let alice = add(&mut state, "alice", &["chat"]);
        let bob = add(&mut state, "bob", &["chat"]);

        let env = Envelope::originate("alice", "mcp/request", json!({"method": "tools/call"})).to(["bob"]);
        let report = route(&mut state, env, "alice", expiry(), &NullObserver);

        assert_eq!(report.dropped, Some(ErrorCode::CapabilityViolation));
        assert!(bob.frames().is_empty());
        assert_eq!(alice.frames().len(), 1);
        assert!(alice.frames()[0].contains("capability_violation"));
    }

    #[test]
    fn reused_envelope_id_is_rejected_while_still_in_history() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        let alice = add(&mut state, "alice", &["chat"]);
        add(&mut state, "bob", &["chat"]);

        let mut first = Envelope::originate("alice", "chat", json!({"text": "one"}));
        first.id = "dup".to_string();
        route(&mut state, first, "alice", expiry(), &NullObserver);

        let mut second = Envelope::originate("alice", "chat", json!({"text": "two"}));
        second.id = "dup".to_string();
        let report = route(&mut state, second, "alice", expiry(), &NullObserver);

        assert_eq!(report.dropped, Some(ErrorCode::InvalidFormat));
        assert!(alice.frames().iter().any(|f| f.contains("invalid_format")));
    }

    #[test]
    fn from_mismatch_is_an_auth_violation() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        add(&mut state, "alice", &["chat"]);
        let env = Envelope::originate("mallory", "chat", json!({}));
        let report = route(&mut state, env, "alice", expiry(), &NullObserver);
        assert_eq!(report.dropped, Some(ErrorCode::AuthViolation));
    }

    #[test]
    fn unknown_recipient_is_reported_but_known_ones_still_get_delivery() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        let alice = add(&mut state, "alice", &["chat"]);
        let bob = add(&mut state, "bob", &["chat"]);

        let env = Envelope::originate("alice", "chat", json!({"text": "hi"})).to(["bob", "ghost"]);
        let report = route(&mut state, env, "alice", expiry(), &NullObserver);

        assert_eq!(report.delivered_to, vec!["bob".to_string()]);
        assert_eq!(report.unknown_recipients, vec!["ghost".to_string()]);
        assert_eq!(bob.frames().len(), 1);
        assert!(alice.frames()[0].contains("unknown_recipient"));
    }

    #[test]
    fn proposal_fulfillment_suppresses_expiry() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        add(&mut state, "alice", &["mcp/proposal"]);
        add(&mut state, "bob", &["mcp/request", "mcp/response"]);

        let proposal = Envelope::originate("alice", "mcp/proposal", json!({}));
        let proposal_id = proposal.id.clone();
        route(&mut state, proposal, "alice", expiry(), &NullObserver);
        assert!(state.pending_proposals.contains_key(&proposal_id));

        let request = Envelope::originate("bob", "mcp/request", json!({})).correlating([proposal_id.clone()]);
        route(&mut state, request, "bob", expiry(), &NullObserver);
        assert!(state.pending_proposals.is_empty());
    }

    #[test]
    fn stream_request_opens_a_stream_and_broadcasts_to_everyone() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        let alice = add(&mut state, "alice", &["stream/request"]);
        let bob = add(&mut state, "bob", &["stream/request"]);

        let req = Envelope::originate("alice", "stream/request", json!({}));
        route(&mut state, req, "alice", expiry(), &NullObserver);

        assert_eq!(state.streams.active_streams().len(), 1);
        assert_eq!(alice.frames().len(), 1);
        assert_eq!(bob.frames().len(), 1);
        assert!(alice.frames()[0].contains("stream/open"));
    }

    #[test]
    fn out_of_order_stream_data_is_dropped_with_a_sequence_violation() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        let alice = add(&mut state, "alice", &["stream/request", "stream/data"]);
        add(&mut state, "bob", &["stream/request", "stream/data"]);

        let req = Envelope::originate("alice", "stream/request", json!({}));
        route(&mut state, req, "alice", expiry(), &NullObserver);
        let stream_id = state.streams.active_streams()[0].stream_id.clone();

        let data = Envelope::originate("alice", "stream/data", json!({"stream_id": stream_id, "seq": 5, "data": "x"}));
        route(&mut state, data, "alice", expiry(), &NullObserver);
        let replay = Envelope::originate("alice", "stream/data", json!({"stream_id": stream_id, "seq": 3, "data": "y"}));
        let report = route(&mut state, replay, "alice", expiry(), &NullObserver);

        assert_eq!(report.dropped, Some(ErrorCode::StreamSequenceViolation));
        assert!(alice.frames().iter().any(|f| f.contains("stream_sequence_violation")));
    }

    #[test]
    fn grant_ack_is_not_gated_behind_a_capability_of_its_own() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        add(&mut state, "alice", &["capability/*", "chat"]);
        add(&mut state, "bob", &["chat"]);

        let grant = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
        let grant_id = grant.id.clone();
        route(&mut state, grant, "alice", expiry(), &NullObserver);

        let ack = Envelope::originate("bob", "capability/grant-ack", json!({"grant_id": grant_id}));
        let report = route(&mut state, ack, "bob", expiry(), &NullObserver);
        assert!(report.dropped.is_none());
        assert!(state.grants.get(&grant_id).is_some_and(|g| g.acknowledged));
    }

    #[test]
    fn explicit_revoke_notifies_the_grantee() {
        let mut state = SpaceState::new("demo", 100, 120, 60, 256);
        add(&mut state, "alice", &["capability/*", "chat"]);
        let bob = add(&mut state, "bob", &["chat"]);

        let grant = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
        let grant_id = grant.id.clone();
        route(&mut state, grant, "alice", expiry(), &NullObserver);
        bob.0.lock().unwrap().clear();

        let revoke = Envelope::originate("alice", "capability/revoke", json!({"grant_id": grant_id}));
        let report = route(&mut state, revoke, "alice", expiry(), &NullObserver);

        assert!(report.dropped.is_none());
        let frames = bob.frames();
        assert!(frames.iter().any(|f| f.contains("capability/revoke") && f.contains(&grant_id)));
        assert!(state.grants.is_empty());
    }
}
