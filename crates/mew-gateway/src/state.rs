//! Shared application state handed to every axum handler: one
//! `Arc<AppState>` cloned into the router, holding the process-wide
//! config, auth codec, and a lazily populated table of per-space actors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use mew_auth::TokenCodec;
use mew_config::GatewayConfig;
use mew_router::{NullObserver, SpaceObserver, SpaceOwner};
use tokio::sync::RwLock;

use crate::logs::JsonlObserver;

/// Process-wide state shared across all spaces this gateway instance serves.
pub struct AppState {
    /// Effective runtime configuration.
    pub config: GatewayConfig,
    /// Token signer/verifier built from `config.hmac_secret`.
    pub auth: TokenCodec,
    /// Side-channel observer wired into every space owner this process spawns.
    pub observer: Arc<dyn SpaceObserver>,
    /// Lazily created space actors, keyed by space name (`spec` §5: spaces
    /// are isolated and created on first reference, there is no
    /// pre-registration step).
    spaces: RwLock<HashMap<String, Arc<SpaceOwner>>>,
    /// When this process started, for `GET /health`'s `uptime_secs`.
    pub started_at: Instant,
}

impl AppState {
    /// Build state from a loaded configuration. When `config.logs_dir` is
    /// writable this wires a [`JsonlObserver`]; tests may instead construct
    /// `AppState` directly with [`AppState::with_observer`] and a
    /// `NullObserver` or a recording stub.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let observer = Arc::new(JsonlObserver::new(config.logs_dir.clone()));
        Self::with_observer(config, observer)
    }

    /// Build state with an explicit observer, e.g. `NullObserver` in tests.
    #[must_use]
    pub fn with_observer(config: GatewayConfig, observer: Arc<dyn SpaceObserver>) -> Self {
        let auth = TokenCodec::new(config.hmac_secret.clone().unwrap_or_default());
        Self { config, auth, observer, spaces: RwLock::new(HashMap::new()), started_at: Instant::now() }
    }

    /// Fetch the space owner for `space`, spawning a fresh actor on first
    /// reference or if the previous owner tore itself down after its last
    /// participant disconnected (`spec` §3: spaces are destroyed, history
    /// and all, once empty).
    pub async fn space_owner(&self, space: &str) -> Arc<SpaceOwner> {
        if let Some(owner) = self.spaces.read().await.get(space) {
            if !owner.handle.is_finished() {
                return owner.clone();
            }
        }
        let mut guard = self.spaces.write().await;
        if let Some(owner) = guard.get(space) {
            if !owner.handle.is_finished() {
                return owner.clone();
            }
        }
        let owner = Arc::new(SpaceOwner::spawn_with_stream_timeout(
            space.to_string(),
            self.config.history_cap,
            self.config.rate_limit_per_min,
            self.config.chat_rate_limit_per_min,
            self.config.grant_cap_per_participant,
            chrono::Duration::from_std(self.config.proposal_expiry).unwrap_or_else(|_| chrono::Duration::minutes(5)),
            self.config.stream_inactivity_timeout,
            self.observer.clone(),
        ));
        guard.insert(space.to_string(), owner.clone());
        owner
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::with_observer(GatewayConfig::default(), Arc::new(NullObserver))
    }
}
