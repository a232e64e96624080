//! Capability grant lifecycle (`spec` §4.6): authorization, dynamic
//! capability augmentation, acknowledgement, and revocation on disconnect
//! or explicit `capability/revoke`.

use mew_core::{CapabilityPattern, Envelope, GrantRecord};
use mew_error::{ErrorCode, GatewayError};

use crate::state::SpaceState;

fn single_recipient(envelope: &Envelope) -> Option<&str> {
    match envelope.to.as_deref() {
        Some([only]) => Some(only.as_str()),
        _ => None,
    }
}

/// Authorize and record a `capability/grant` envelope, augmenting the
/// grantee's live capability set in the registry.
///
/// Requires the granter to already hold the requested pattern (or the
/// meta-capability `capability/*`), and that the granter has not reached
/// `grant_cap_per_participant` live grants. Returns the created record on
/// success.
pub fn authorize_and_record_grant(state: &mut SpaceState, envelope: &Envelope) -> Result<GrantRecord, GatewayError> {
    let grantee = single_recipient(envelope).ok_or_else(|| {
        GatewayError::new(ErrorCode::CapabilityViolation, "capability/grant must address exactly one recipient")
    })?;
    let capability_value = envelope.payload.get("capability").cloned().ok_or_else(|| {
        GatewayError::new(ErrorCode::CapabilityViolation, "capability/grant payload missing 'capability'")
    })?;
    let pattern = CapabilityPattern::structured(capability_value);

    let granter_caps = state.registry.capabilities_of(&envelope.from).ok_or_else(|| {
        GatewayError::new(ErrorCode::CapabilityViolation, "granter is not a connected participant")
    })?;

    let decision = state.grant_policy.can_grant(&granter_caps, &pattern);
    if !decision.is_allowed() {
        return Err(GatewayError::new(
            ErrorCode::CapabilityViolation,
            decision.reason.unwrap_or_else(|| "grant denied".to_string()),
        )
        .with_context("attempted_kind", "capability/grant"));
    }

    let issued = state.grants_by_granter.get(&envelope.from).map_or(0, |ids| ids.len());
    if issued >= state.grant_cap_per_participant {
        return Err(GatewayError::new(
            ErrorCode::CapabilityViolation,
            format!("granter has reached its grant cap of {}", state.grant_cap_per_participant),
        ));
    }

    let mut grantee_caps = state.registry.capabilities_of(grantee).ok_or_else(|| {
        GatewayError::new(ErrorCode::UnknownRecipient, format!("'{grantee}' is not connected"))
    })?;
    grantee_caps.push(pattern.clone());
    state.registry.set_capabilities(grantee, grantee_caps);
    state.matcher.invalidate_all();

    let record = GrantRecord {
        grant_id: envelope.id.clone(),
        granter: envelope.from.clone(),
        grantee: grantee.to_string(),
        pattern,
        created: envelope.ts,
        acknowledged: false,
    };
    state.grants.insert(record.grant_id.clone(), record.clone());
    state.grants_by_granter.entry(record.granter.clone()).or_default().insert(record.grant_id.clone());
    state.grants_by_grantee.entry(record.grantee.clone()).or_default().insert(record.grant_id.clone());
    Ok(record)
}

/// Record a `capability/grant-ack` from the grantee. Returns whether a
/// matching, unacknowledged grant was found.
pub fn acknowledge(state: &mut SpaceState, envelope: &Envelope) -> bool {
    let Some(grant_id) = envelope.payload.get("grant_id").and_then(serde_json::Value::as_str) else {
        return false;
    };
    match state.grants.get_mut(grant_id) {
        Some(record) if record.grantee == envelope.from => {
            record.acknowledged = true;
            true
        }
        _ => false,
    }
}

fn remove_grant(state: &mut SpaceState, grant_id: &str) -> Option<GrantRecord> {
    let record = state.grants.remove(grant_id)?;
    if let Some(ids) = state.grants_by_granter.get_mut(&record.granter) {
        ids.remove(grant_id);
    }
    if let Some(ids) = state.grants_by_grantee.get_mut(&record.grantee) {
        ids.remove(grant_id);
    }
    if let Some(mut caps) = state.registry.capabilities_of(&record.grantee) {
        caps.retain(|c| c.as_value() != record.pattern.as_value());
        state.registry.set_capabilities(&record.grantee, caps);
        state.matcher.invalidate_all();
    }
    Some(record)
}

fn revoke_notice(record: &GrantRecord) -> Envelope {
    Envelope::originate(
        "gateway",
        "capability/revoke",
        serde_json::json!({
            "grant_id": record.grant_id,
            "capability": record.pattern.as_value(),
        }),
    )
    .to([record.grantee.clone()])
    .correlating([record.grant_id.clone()])
}

/// Explicitly revoke a grant, requested by an envelope whose `from` is
/// either the original granter or a holder of `capability/*`. The payload
/// must carry `{"grant_id": ...}`. Returns the `capability/revoke`
/// notification to deliver to the grantee.
pub fn revoke_explicit(state: &mut SpaceState, envelope: &Envelope) -> Result<Envelope, GatewayError> {
    let grant_id = envelope
        .payload
        .get("grant_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| GatewayError::new(ErrorCode::CapabilityViolation, "capability/revoke payload missing 'grant_id'"))?
        .to_string();

    let record = state
        .grants
        .get(&grant_id)
        .cloned()
        .ok_or_else(|| GatewayError::new(ErrorCode::CapabilityViolation, "no such live grant"))?;

    let requester_is_granter = envelope.from == record.granter;
    let requester_holds_wildcard = state
        .registry
        .capabilities_of(&envelope.from)
        .is_some_and(|caps| caps.iter().any(|c| c.as_value() == CapabilityPattern::grant_wildcard().as_value()));

    if !requester_is_granter && !requester_holds_wildcard {
        return Err(GatewayError::new(
            ErrorCode::CapabilityViolation,
            "only the granter or a capability/* holder may revoke this grant",
        ));
    }

    remove_grant(state, &grant_id);
    Ok(revoke_notice(&record))
}

/// Revoke every grant associated with a disconnecting participant, in
/// either the granter or grantee role (`spec` §4.6/§8: "if P disconnects,
/// G is revoked before any later envelope from the grantee is authorized
/// under G"). Returns the `capability/revoke` notifications to deliver.
pub fn revoke_all_for(state: &mut SpaceState, participant_id: &str) -> Vec<Envelope> {
    let mut grant_ids: Vec<String> = state
        .grants_by_granter
        .get(participant_id)
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    grant_ids.extend(state.grants_by_grantee.get(participant_id).into_iter().flatten().cloned());
    grant_ids.sort();
    grant_ids.dedup();

    grant_ids
        .into_iter()
        .filter_map(|id| remove_grant(state, &id))
        .map(|record| revoke_notice(&record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mew_registry::ConnectionSink;
    use serde_json::json;
    use std::sync::Arc;

    struct NullSink;
    impl ConnectionSink for NullSink {
        fn send(&self, _frame: &str) -> bool {
            true
        }
        fn close(&self) {}
    }

    fn state_with(alice_caps: &[&str], bob_caps: &[&str]) -> SpaceState {
        let mut s = SpaceState::new("demo", 100, 120, 60, 2);
        s.registry
            .add("alice", alice_caps.iter().map(|c| CapabilityPattern::simple(*c)).collect(), Arc::new(NullSink))
            .unwrap();
        s.registry
            .add("bob", bob_caps.iter().map(|c| CapabilityPattern::simple(*c)).collect(), Arc::new(NullSink))
            .unwrap();
        s
    }

    #[test]
    fn holder_of_wildcard_may_grant_anything() {
        let mut s = state_with(&["capability/*", "chat"], &["chat"]);
        let grant = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
        let record = authorize_and_record_grant(&mut s, &grant).unwrap();
        assert_eq!(record.grantee, "bob");
        let bob_caps = s.registry.capabilities_of("bob").unwrap();
        assert!(bob_caps.iter().any(|c| c.as_value() == &json!("mcp/request")));
    }

    #[test]
    fn granter_without_the_capability_is_denied() {
        let mut s = state_with(&["chat"], &["chat"]);
        let grant = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
        let err = authorize_and_record_grant(&mut s, &grant).unwrap_err();
        assert_eq!(err.code, ErrorCode::CapabilityViolation);
    }

    #[test]
    fn grant_cap_per_participant_is_enforced() {
        let mut s = state_with(&["capability/*"], &["chat"]);
        s.registry.add("carol", vec![CapabilityPattern::simple("chat")], Arc::new(NullSink)).unwrap();
        s.registry.add("dana", vec![CapabilityPattern::simple("chat")], Arc::new(NullSink)).unwrap();
        let g1 = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
        let g2 = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/response"})).to(["carol"]);
        authorize_and_record_grant(&mut s, &g1).unwrap();
        authorize_and_record_grant(&mut s, &g2).unwrap();
        let g3 = Envelope::originate("alice", "capability/grant", json!({"capability": "chat"})).to(["dana"]);
        let err = authorize_and_record_grant(&mut s, &g3).unwrap_err();
        assert_eq!(err.code, ErrorCode::CapabilityViolation);
    }

    #[test]
    fn acknowledge_marks_the_matching_record() {
        let mut s = state_with(&["capability/*"], &["chat"]);
        let grant = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
        let record = authorize_and_record_grant(&mut s, &grant).unwrap();
        let ack = Envelope::originate("bob", "capability/grant-ack", json!({"grant_id": record.grant_id}));
        assert!(acknowledge(&mut s, &ack));
        assert!(s.grants[&record.grant_id].acknowledged);
    }

    #[test]
    fn disconnect_of_granter_revokes_its_grants() {
        let mut s = state_with(&["capability/*"], &["chat"]);
        let grant = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
        authorize_and_record_grant(&mut s, &grant).unwrap();

        let revocations = revoke_all_for(&mut s, "alice");
        assert_eq!(revocations.len(), 1);
        assert_eq!(revocations[0].kind, "capability/revoke");
        assert_eq!(revocations[0].to.as_deref(), Some(&["bob".to_string()][..]));
        assert!(s.grants.is_empty());
        let bob_caps = s.registry.capabilities_of("bob").unwrap();
        assert!(!bob_caps.iter().any(|c| c.as_value() == &json!("mcp/request")));
    }

    #[test]
    fn explicit_revoke_by_granter_succeeds() {
        let mut s = state_with(&["capability/*"], &["chat"]);
        let grant = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
        let record = authorize_and_record_grant(&mut s, &grant).unwrap();
        let revoke = Envelope::originate("alice", "capability/revoke", json!({"grant_id": record.grant_id}));
        let notice = revoke_explicit(&mut s, &revoke).unwrap();
        assert_eq!(notice.to.as_deref(), Some(&["bob".to_string()][..]));
        assert!(s.grants.is_empty());
    }

    #[test]
    fn explicit_revoke_by_non_granter_without_wildcard_is_denied() {
        let mut s = state_with(&["capability/*"], &["chat"]);
        let grant = Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
        let record = authorize_and_record_grant(&mut s, &grant).unwrap();
        let revoke = Envelope::originate("bob", "capability/revoke", json!({"grant_id": record.grant_id}));
        let err = revoke_explicit(&mut s, &revoke).unwrap_err();
        assert_eq!(err.code, ErrorCode::CapabilityViolation);
        assert!(s.grants.contains_key(&record.grant_id));
    }
}
