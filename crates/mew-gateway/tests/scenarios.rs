//! End-to-end scenarios (`spec` §8) driven straight through the
//! actor/router stack with in-process mock connection sinks — no real
//! sockets.

use std::sync::{Arc, Mutex};

use chrono::Duration;
use mew_core::{CapabilityPattern, DisconnectReason, Envelope};
use mew_registry::ConnectionSink;
use mew_router::{NullObserver, SpaceCommand, SpaceOwner};
use serde_json::{Value, json};
use tokio::sync::oneshot;

/// Records every frame sent to it, decoding each as JSON for assertions.
struct RecordingSink(Mutex<Vec<String>>);

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    fn frames(&self) -> Vec<Value> {
        self.0.lock().unwrap().iter().map(|f| serde_json::from_str(f).unwrap()).collect()
    }
}

impl ConnectionSink for RecordingSink {
    fn send(&self, frame: &str) -> bool {
        self.0.lock().unwrap().push(frame.to_string());
        true
    }
    fn close(&self) {}
}

fn spawn_space(name: &str) -> SpaceOwner {
    SpaceOwner::spawn(name, 1000, 120, 60, 256, Duration::minutes(5), Arc::new(NullObserver))
}

async fn connect(
    owner: &SpaceOwner,
    id: &str,
    caps: &[&str],
) -> (Arc<RecordingSink>, mew_core::WelcomePayload) {
    let sink = RecordingSink::new();
    let (tx, rx) = oneshot::channel();
    owner
        .sender
        .send(SpaceCommand::Connect {
            id: id.to_string(),
            capabilities: caps.iter().map(|c| CapabilityPattern::simple(*c)).collect(),
            sink: sink.clone(),
            reply: tx,
        })
        .await
        .unwrap();
    let welcome = rx.await.unwrap().unwrap();
    (sink, welcome)
}

async fn send(owner: &SpaceOwner, envelope: Envelope, authenticated_id: &str) -> mew_router::RouteReport {
    let (tx, rx) = oneshot::channel();
    owner.sender.send(SpaceCommand::Inbound { envelope, authenticated_id: authenticated_id.to_string(), reply: tx }).await.unwrap();
    rx.await.unwrap()
}

async fn shutdown(owner: SpaceOwner) {
    owner.sender.send(SpaceCommand::Shutdown).await.unwrap();
    owner.handle.await.unwrap();
}

#[tokio::test]
async fn happy_path_chat_broadcast() {
    let owner = spawn_space("demo");
    let (alice_sink, _) = connect(&owner, "alice", &["chat"]).await;
    let (bob_sink, _) = connect(&owner, "bob", &["chat"]).await;

    let report = send(&owner, Envelope::originate("alice", "chat", json!({"text": "hi"})), "alice").await;
    assert_eq!(report.delivered_to, vec!["bob".to_string()]);

    let bob_frames = bob_sink.frames();
    let chat = bob_frames.iter().find(|f| f["kind"] == "chat").expect("bob should see the chat envelope");
    assert_eq!(chat["from"], "alice");
    assert!(alice_sink.frames().iter().all(|f| f["kind"] != "chat"), "alice must not receive her own message");

    shutdown(owner).await;
}

#[tokio::test]
async fn capability_violation_is_reported_only_to_the_sender() {
    let owner = spawn_space("demo");
    let (alice_sink, _) = connect(&owner, "alice", &["chat"]).await;
    let (bob_sink, _) = connect(&owner, "bob", &["chat"]).await;

    let report = send(
        &owner,
        Envelope::originate("alice", "mcp/request", json!({"method": "tools/call", "params": {"name": "rm"}})).to(["bob"]),
        "alice",
    )
    .await;
    assert_eq!(report.dropped, Some(mew_error::ErrorCode::CapabilityViolation));

    let error = alice_sink.frames().into_iter().find(|f| f["kind"] == "system/error").expect("alice gets the error");
    assert_eq!(error["payload"]["error"], "capability_violation");
    assert_eq!(error["payload"]["attempted_kind"], "mcp/request");
    assert!(bob_sink.frames().iter().all(|f| f["kind"] != "mcp/request"), "bob must receive nothing");

    shutdown(owner).await;
}

#[tokio::test]
async fn proposal_fulfillment_never_expires() {
    let owner = spawn_space("demo");
    connect(&owner, "alice", &["mcp/proposal"]).await;
    connect(&owner, "bob", &["mcp/request", "mcp/response"]).await;

    let proposal = Envelope::originate("alice", "mcp/proposal", json!({"tool": "search"}));
    let proposal_id = proposal.id.clone();
    send(&owner, proposal, "alice").await;

    let request =
        Envelope::originate("bob", "mcp/request", json!({"method": "tools/call"})).correlating([proposal_id.clone()]);
    let report = send(&owner, request, "bob").await;
    assert!(report.dropped.is_none());

    // A sweep well past the expiry window must emit no notice: the
    // proposal was already consumed by the correlating request above.
    owner.sender.send(SpaceCommand::ExpireProposals).await.unwrap();

    shutdown(owner).await;
}

#[tokio::test]
async fn stream_lifecycle_with_late_joiner() {
    let owner = spawn_space("demo");
    let (alice_sink, _) = connect(&owner, "alice", &["chat", "stream/request", "stream/data", "stream/close"]).await;

    send(&owner, Envelope::originate("alice", "stream/request", json!({"direction": "outbound"})), "alice").await;
    let opened = alice_sink.frames().into_iter().find(|f| f["kind"] == "stream/open").expect("stream/open broadcast");
    let stream_id = opened["payload"]["stream_id"].as_str().unwrap().to_string();

    for seq in [1u64, 2] {
        let report = send(
            &owner,
            Envelope::originate("alice", "stream/data", json!({"stream_id": stream_id, "seq": seq})),
            "alice",
        )
        .await;
        assert!(report.dropped.is_none());
    }

    let (_charlie_sink, welcome) = connect(&owner, "charlie", &["chat"]).await;
    assert_eq!(welcome.active_streams.len(), 1);
    assert_eq!(welcome.active_streams[0].stream_id, stream_id);
    assert_eq!(welcome.active_streams[0].owner, "alice");

    send(&owner, Envelope::originate("alice", "stream/close", json!({"stream_id": stream_id})), "alice").await;

    let (_late_sink, late_welcome) = connect(&owner, "dana", &["chat"]).await;
    assert!(late_welcome.active_streams.is_empty());

    shutdown(owner).await;
}

#[tokio::test]
async fn grant_then_direct_use_then_revocation_on_disconnect() {
    let owner = spawn_space("demo");
    connect(&owner, "alice", &["capability/*", "chat"]).await;
    connect(&owner, "bob", &["chat"]).await;

    let denied = send(&owner, Envelope::originate("bob", "mcp/request", json!({"method": "tools/call"})), "bob").await;
    assert_eq!(denied.dropped, Some(mew_error::ErrorCode::CapabilityViolation));

    let grant =
        Envelope::originate("alice", "capability/grant", json!({"capability": "mcp/request"})).to(["bob"]);
    let grant_id = grant.id.clone();
    send(&owner, grant, "alice").await;

    let ack = Envelope::originate("bob", "capability/grant-ack", json!({"grant_id": grant_id})).to(["alice"]);
    send(&owner, ack, "bob").await;

    let allowed = send(&owner, Envelope::originate("bob", "mcp/request", json!({"method": "tools/call"})), "bob").await;
    assert!(allowed.dropped.is_none());

    owner.sender.send(SpaceCommand::Disconnect { id: "alice".to_string(), reason: DisconnectReason::Closed }).await.unwrap();

    let denied_again = send(&owner, Envelope::originate("bob", "mcp/request", json!({"method": "tools/call"})), "bob").await;
    assert_eq!(denied_again.dropped, Some(mew_error::ErrorCode::CapabilityViolation));

    shutdown(owner).await;
}

#[tokio::test]
async fn lazy_auto_connect_welcomes_a_log_backed_participant_before_any_other_frame() {
    let owner = spawn_space("demo");
    let logger_sink = RecordingSink::new();

    let (tx, rx) = oneshot::channel();
    owner
        .sender
        .send(SpaceCommand::Connect {
            id: "logger".to_string(),
            capabilities: vec![CapabilityPattern::simple("chat")],
            sink: logger_sink.clone(),
            reply: tx,
        })
        .await
        .unwrap();
    let welcome = rx.await.unwrap().unwrap();
    assert_eq!(welcome.you.id, "logger");

    // The gateway itself (not the router) writes `system/welcome` to the
    // sink directly after a successful connect; the unit mirrors that here
    // to assert ordering rather than depending on the HTTP layer.
    let frame = Envelope::originate("gateway", "system/welcome", serde_json::to_value(&welcome).unwrap()).to(["logger".to_string()]);
    logger_sink.send(&mew_protocol::EnvelopeCodec::encode(&frame).unwrap());

    connect(&owner, "someone", &["chat"]).await;
    send(&owner, Envelope::originate("someone", "chat", json!({"text": "hello logger"})), "someone").await;

    let frames = logger_sink.frames();
    assert_eq!(frames[0]["kind"], "system/welcome");
    assert!(frames.iter().any(|f| f["kind"] == "chat"));

    shutdown(owner).await;
}
