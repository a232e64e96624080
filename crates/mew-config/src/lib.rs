// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-config
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! TOML-loadable runtime configuration for the MEW gateway, with environment
//! variable overrides and explicit hard-error/soft-warning validation.

use mew_core::CapabilitySet;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors that can occur loading or parsing a [`GatewayConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed (one or more hard errors).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level configuration issues that do not prevent startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `insecure_auth` is disabled but no `hmac_secret` was configured, so
    /// every token will fail signature verification.
    MissingHmacSecret,
    /// `insecure_auth` is enabled, which accepts bare participant ids as
    /// tokens — appropriate for development only.
    InsecureAuthEnabled,
    /// `stream_inactivity_timeout` is unusually large.
    LargeStreamTimeout {
        /// Configured timeout in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHmacSecret => {
                write!(f, "insecure_auth is false but no hmac_secret is configured")
            }
            Self::InsecureAuthEnabled => {
                write!(f, "insecure_auth is enabled; do not use in production")
            }
            Self::LargeStreamTimeout { secs } => {
                write!(f, "stream_inactivity_timeout is unusually large ({secs}s)")
            }
        }
    }
}

const DEFAULT_PROTOCOL_TAG: &str = "mew/v0.4";
const DEFAULT_HISTORY_CAP: usize = 1000;
const DEFAULT_RATE_LIMIT_PER_MIN: u32 = 120;
const DEFAULT_CHAT_RATE_LIMIT_PER_MIN: u32 = 60;
const DEFAULT_MAX_ENVELOPE_BYTES: usize = 262_144;
const DEFAULT_GRANT_CAP_PER_PARTICIPANT: usize = 256;
const LARGE_STREAM_TIMEOUT_THRESHOLD_SECS: u64 = 3_600;

fn default_protocol_tag() -> String {
    DEFAULT_PROTOCOL_TAG.to_string()
}
fn default_history_cap() -> usize {
    DEFAULT_HISTORY_CAP
}
fn default_rate_limit_per_min() -> u32 {
    DEFAULT_RATE_LIMIT_PER_MIN
}
fn default_chat_rate_limit_per_min() -> u32 {
    DEFAULT_CHAT_RATE_LIMIT_PER_MIN
}
fn default_max_envelope_bytes() -> usize {
    DEFAULT_MAX_ENVELOPE_BYTES
}
fn default_grant_cap_per_participant() -> usize {
    DEFAULT_GRANT_CAP_PER_PARTICIPANT
}
fn default_bind_addr() -> String {
    "127.0.0.1:8765".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_logs_dir() -> String {
    ".mew/logs".to_string()
}
fn default_default_capabilities() -> CapabilitySet {
    mew_core::default_capabilities()
}

#[allow(clippy::unnecessary_wraps)]
fn default_proposal_expiry() -> Duration {
    Duration::from_secs(300)
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Top-level runtime configuration for the MEW gateway.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct GatewayConfig {
    /// Address the HTTP/WebSocket listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Protocol version tag this gateway speaks and requires of envelopes.
    #[serde(default = "default_protocol_tag")]
    pub protocol_tag: String,

    /// Maximum number of envelopes retained in a space's history ring buffer.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// General per-participant messages-per-minute cap.
    #[serde(default = "default_rate_limit_per_min")]
    pub rate_limit_per_min: u32,

    /// Narrower per-participant `chat`-only messages-per-minute cap.
    #[serde(default = "default_chat_rate_limit_per_min")]
    pub chat_rate_limit_per_min: u32,

    /// Maximum size in bytes of a single raw envelope at ingress.
    #[serde(default = "default_max_envelope_bytes")]
    pub max_envelope_bytes: usize,

    /// How long an unfulfilled `mcp/proposal` remains pending before expiry.
    #[serde(default = "default_proposal_expiry", with = "mew_serde_duration::duration_millis")]
    pub proposal_expiry: Duration,

    /// Timeout for completing the WebSocket upgrade handshake.
    #[serde(default = "default_handshake_timeout", with = "mew_serde_duration::duration_millis")]
    pub handshake_timeout: Duration,

    /// Optional stream-inactivity timeout; `None` disables it.
    #[serde(default, with = "mew_serde_duration::option_duration_millis")]
    pub stream_inactivity_timeout: Option<Duration>,

    /// Maximum number of live grants tracked per granting participant.
    #[serde(default = "default_grant_cap_per_participant")]
    pub grant_cap_per_participant: usize,

    /// HMAC secret used to sign/verify auth tokens. Required unless
    /// `insecure_auth` is `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_secret: Option<String>,

    /// Whether to accept a bare participant id as a valid token. Explicitly
    /// opt-in, development only.
    #[serde(default)]
    pub insecure_auth: bool,

    /// Capability set granted to identities without explicit capabilities.
    #[serde(default = "default_default_capabilities")]
    pub default_capabilities: CapabilitySet,

    /// Directory `.mew/logs`-style per-space logs are written under.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,

    /// Tracing `EnvFilter` directive, e.g. `"info"` or `"mew=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            protocol_tag: default_protocol_tag(),
            history_cap: default_history_cap(),
            rate_limit_per_min: default_rate_limit_per_min(),
            chat_rate_limit_per_min: default_chat_rate_limit_per_min(),
            max_envelope_bytes: default_max_envelope_bytes(),
            proposal_expiry: default_proposal_expiry(),
            handshake_timeout: default_handshake_timeout(),
            stream_inactivity_timeout: None,
            grant_cap_per_participant: default_grant_cap_per_participant(),
            hmac_secret: None,
            insecure_auth: false,
            default_capabilities: default_default_capabilities(),
            logs_dir: default_logs_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Load a [`GatewayConfig`] from an optional TOML file, then apply
/// environment overrides. `None` yields [`GatewayConfig::default`] overlaid
/// with environment variables.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)
                .map_err(|_| ConfigError::FileNotFound { path: p.display().to_string() })?;
            parse_toml(&content)?
        }
        None => GatewayConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`GatewayConfig`].
pub fn parse_toml(content: &str) -> Result<GatewayConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
}

/// Apply `MEW_`-prefixed environment variable overrides on top of a
/// loaded configuration.
///
/// Recognised variables: `MEW_BIND_ADDR`, `MEW_PROTOCOL_TAG`,
/// `MEW_LOG_LEVEL`, `MEW_HMAC_SECRET`, `MEW_INSECURE_AUTH`.
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Ok(val) = std::env::var("MEW_BIND_ADDR") {
        config.bind_addr = val;
    }
    if let Ok(val) = std::env::var("MEW_PROTOCOL_TAG") {
        config.protocol_tag = val;
    }
    if let Ok(val) = std::env::var("MEW_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Ok(val) = std::env::var("MEW_HMAC_SECRET") {
        config.hmac_secret = Some(val);
    }
    if let Ok(val) = std::env::var("MEW_INSECURE_AUTH") {
        config.insecure_auth = matches!(val.as_str(), "1" | "true" | "TRUE" | "yes");
    }
}

/// Validate a loaded configuration. Hard errors (zero caps, zero byte
/// limits) come back as [`ConfigError::ValidationError`]; soft issues come
/// back as [`ConfigWarning`]s.
pub fn validate_config(config: &GatewayConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.history_cap == 0 {
        errors.push("history_cap must be greater than zero".to_string());
    }
    if config.rate_limit_per_min == 0 {
        errors.push("rate_limit_per_min must be greater than zero".to_string());
    }
    if config.chat_rate_limit_per_min == 0 {
        errors.push("chat_rate_limit_per_min must be greater than zero".to_string());
    }
    if config.max_envelope_bytes == 0 {
        errors.push("max_envelope_bytes must be greater than zero".to_string());
    }
    if config.grant_cap_per_participant == 0 {
        errors.push("grant_cap_per_participant must be greater than zero".to_string());
    }
    if config.protocol_tag.trim().is_empty() {
        errors.push("protocol_tag must not be empty".to_string());
    }

    if !config.insecure_auth && config.hmac_secret.as_deref().unwrap_or("").is_empty() {
        warnings.push(ConfigWarning::MissingHmacSecret);
    }
    if config.insecure_auth {
        warnings.push(ConfigWarning::InsecureAuthEnabled);
    }
    if let Some(timeout) = config.stream_inactivity_timeout {
        if timeout.as_secs() > LARGE_STREAM_TIMEOUT_THRESHOLD_SECS {
            warnings.push(ConfigWarning::LargeStreamTimeout { secs: timeout.as_secs() });
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}
