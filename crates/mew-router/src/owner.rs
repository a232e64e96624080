//! The space-owner actor (`spec` §5): a single `tokio` task serializing
//! every mutation to one space's [`SpaceState`] behind an `mpsc` command
//! channel, so routing decisions are atomic without locking the state
//! itself across awaits.

use std::sync::Arc;

use chrono::Duration;
use mew_core::{CapabilitySet, DisconnectReason, Envelope, WelcomePayload};
use mew_error::GatewayError;
use mew_registry::ConnectionSink;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::events::SpaceObserver;
use crate::grant;
use crate::proposal;
use crate::router::{self, RouteReport};
use crate::state::SpaceState;

/// Commands accepted by a running [`SpaceOwner`] task.
pub enum SpaceCommand {
    /// Register a newly authenticated connection.
    Connect {
        /// Participant id, unique within the space.
        id: String,
        /// The participant's static capability set.
        capabilities: CapabilitySet,
        /// Where to deliver outbound frames.
        sink: Arc<dyn ConnectionSink>,
        /// Resolves with the `system/welcome` payload, or a duplicate-id error.
        reply: oneshot::Sender<Result<WelcomePayload, GatewayError>>,
    },
    /// Remove a participant and revoke/close everything it owned.
    Disconnect {
        /// The departing participant's id.
        id: String,
        /// Why the connection ended.
        reason: DisconnectReason,
    },
    /// Route one inbound envelope.
    Inbound {
        /// The envelope to route.
        envelope: Envelope,
        /// The identity bound to the submitting connection.
        authenticated_id: String,
        /// Resolves with a summary of what routing did.
        reply: oneshot::Sender<RouteReport>,
    },
    /// Sweep expired proposals as of now. Fired on a timer by the caller.
    ExpireProposals,
    /// Stop the actor loop.
    Shutdown,
}

/// A running space's command channel and join handle.
pub struct SpaceOwner {
    /// Send commands to the actor loop.
    pub sender: mpsc::Sender<SpaceCommand>,
    /// The actor task's join handle.
    pub handle: tokio::task::JoinHandle<()>,
}

/// How often the expiry ticker asks a space owner to sweep pending
/// proposals (`spec` §5: "timer ticks ... proposal expiry"). Proposals
/// themselves expire on their own configured window; this only bounds how
/// stale a missed expiry can be.
const EXPIRY_TICK: std::time::Duration = std::time::Duration::from_secs(30);

impl SpaceOwner {
    /// Spawn a new space-owner task for `space_name`, backed by an empty
    /// [`SpaceState`] built from the given limits, plus a companion ticker
    /// that periodically asks the owner to sweep expired proposals. The
    /// ticker exits on its own once the owner's command channel closes.
    #[must_use]
    pub fn spawn(
        space_name: impl Into<String>,
        history_cap: usize,
        rate_limit_per_min: u32,
        chat_rate_limit_per_min: u32,
        grant_cap_per_participant: usize,
        proposal_expiry: Duration,
        observer: Arc<dyn SpaceObserver>,
    ) -> Self {
        Self::spawn_with_stream_timeout(
            space_name,
            history_cap,
            rate_limit_per_min,
            chat_rate_limit_per_min,
            grant_cap_per_participant,
            proposal_expiry,
            None,
            observer,
        )
    }

    /// Like [`SpaceOwner::spawn`], additionally enforcing a stream
    /// inactivity timeout (`spec` §5) when `stream_inactivity_timeout` is
    /// `Some`; `None` leaves streams open indefinitely until an explicit
    /// close or owner disconnection, the spec's default.
    #[must_use]
    pub fn spawn_with_stream_timeout(
        space_name: impl Into<String>,
        history_cap: usize,
        rate_limit_per_min: u32,
        chat_rate_limit_per_min: u32,
        grant_cap_per_participant: usize,
        proposal_expiry: Duration,
        stream_inactivity_timeout: Option<std::time::Duration>,
        observer: Arc<dyn SpaceObserver>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let state = SpaceState::new(space_name, history_cap, rate_limit_per_min, chat_rate_limit_per_min, grant_cap_per_participant);
        let handle = tokio::spawn(run(state, rx, proposal_expiry, stream_inactivity_timeout, observer));
        tokio::spawn(run_expiry_ticker(tx.clone()));
        Self { sender: tx, handle }
    }
}

/// Periodically nudge a space owner to sweep proposals past their expiry
/// window. Stops as soon as the owner has shut down and dropped its
/// receiver, so it never outlives the space it ticks for.
async fn run_expiry_ticker(sender: mpsc::Sender<SpaceCommand>) {
    let mut interval = tokio::time::interval(EXPIRY_TICK);
    interval.tick().await; // first tick fires immediately; skip it
    loop {
        interval.tick().await;
        if sender.send(SpaceCommand::ExpireProposals).await.is_err() {
            break;
        }
    }
}

async fn run(
    mut state: SpaceState,
    mut rx: mpsc::Receiver<SpaceCommand>,
    proposal_expiry: Duration,
    stream_inactivity_timeout: Option<std::time::Duration>,
    observer: Arc<dyn SpaceObserver>,
) {
    info!(space = %state.name, "space owner started");
    while let Some(command) = rx.recv().await {
        match command {
            SpaceCommand::Connect { id, capabilities, sink, reply } => {
                let result = handle_connect(&mut state, id, capabilities, sink, observer.as_ref());
                let _ = reply.send(result);
            }
            SpaceCommand::Disconnect { id, reason } => {
                handle_disconnect(&mut state, &id, reason, observer.as_ref());
                if state.is_idle() {
                    // `spec` §3: a space is destroyed (history and all) once
                    // its last participant leaves. Exiting the loop drops
                    // `state` and lets the channel close; `AppState` notices
                    // the finished task and spawns a fresh owner on the next
                    // connect.
                    debug!(space = %state.name, "space is idle, tearing down");
                    break;
                }
            }
            SpaceCommand::Inbound { envelope, authenticated_id, reply } => {
                let report = router::route(&mut state, envelope, &authenticated_id, proposal_expiry, observer.as_ref());
                let _ = reply.send(report);
            }
            SpaceCommand::ExpireProposals => {
                let notices = proposal::expire_due(&mut state, chrono::Utc::now());
                for notice in notices {
                    if let Some(targets) = &notice.to {
                        if let Ok(frame) = mew_protocol::EnvelopeCodec::encode(&notice) {
                            for id in targets {
                                state.registry.send_to(id, &frame);
                            }
                        }
                    }
                }
                if let Some(timeout) = stream_inactivity_timeout {
                    let timeout = Duration::from_std(timeout).unwrap_or(Duration::MAX);
                    let stale = state.streams.close_inactive_since(timeout, chrono::Utc::now());
                    for stream in stale {
                        let close = Envelope::originate(
                            "gateway",
                            "stream/close",
                            serde_json::json!({"stream_id": stream.stream_id, "reason": "inactivity_timeout"}),
                        );
                        if let Ok(frame) = mew_protocol::EnvelopeCodec::encode(&close) {
                            state.registry.broadcast(&frame, None);
                        }
                    }
                }
            }
            SpaceCommand::Shutdown => {
                debug!(space = %state.name, "space owner shutting down");
                break;
            }
        }
    }
    info!(space = %state.name, "space owner stopped");
}

fn handle_connect(
    state: &mut SpaceState,
    id: String,
    capabilities: CapabilitySet,
    sink: Arc<dyn ConnectionSink>,
    observer: &dyn SpaceObserver,
) -> Result<WelcomePayload, GatewayError> {
    state.registry.add(id.clone(), capabilities.clone(), sink).map_err(|e| {
        GatewayError::new(mew_error::ErrorCode::DuplicateParticipant, e.to_string())
    })?;
    observer.on_participant_joined(&state.name, &id);

    let join = Envelope::originate(
        "gateway",
        "system/presence",
        serde_json::json!({"event": "join", "id": id, "capabilities": capabilities}),
    );
    if let Ok(frame) = mew_protocol::EnvelopeCodec::encode(&join) {
        state.registry.broadcast(&frame, Some(&id));
    }

    let you = mew_core::ParticipantSummary::new(id, capabilities);
    let participants = state.registry.summaries();
    let active_streams = state.streams.active_streams();
    Ok(WelcomePayload { you, participants, active_streams })
}

fn handle_disconnect(state: &mut SpaceState, id: &str, reason: DisconnectReason, observer: &dyn SpaceObserver) {
    if !state.registry.remove(id) {
        return;
    }
    state.rate_limiter.remove(id);
    let closed_streams = state.streams.close_all_owned_by(id);
    let revocations = grant::revoke_all_for(state, id);
    observer.on_participant_left(&state.name, id, reason);

    let leave = Envelope::originate(
        "gateway",
        "system/participant-left",
        serde_json::json!({"id": id, "reason": reason}),
    );
    if let Ok(frame) = mew_protocol::EnvelopeCodec::encode(&leave) {
        state.registry.broadcast(&frame, None);
    }
    for revoke in revocations {
        if let (Some(targets), Ok(frame)) = (revoke.to.clone(), mew_protocol::EnvelopeCodec::encode(&revoke)) {
            for target in targets {
                state.registry.send_to(&target, &frame);
            }
        }
    }
    // Streams the departing participant owned close implicitly (`spec`
    // §4.7); subscribers still need the same `stream/close` notice an
    // explicit close would have produced.
    for stream in closed_streams {
        let close = Envelope::originate(
            "gateway",
            "stream/close",
            serde_json::json!({"stream_id": stream.stream_id, "reason": "owner_disconnected"}),
        );
        if let Ok(frame) = mew_protocol::EnvelopeCodec::encode(&close) {
            state.registry.broadcast(&frame, None);
        }
    }
    warn!(space = %state.name, participant = %id, "participant disconnected");
}
