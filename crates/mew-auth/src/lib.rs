// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-auth
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Token authentication for the MEW gateway: HMAC-signed claims binding a
//! participant id, a space, and a capability set, with an optional
//! "insecure mode" fallback (a bare participant id as the token) for local
//! development, gated behind an explicit opt-in.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use mew_core::CapabilitySet;
use mew_error::{ErrorCode, GatewayError};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The signed payload carried inside an auth token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// The participant id this token authenticates.
    pub participant_id: String,
    /// The space this token is valid for; connections to any other space
    /// must be rejected.
    pub space: String,
    /// Static capability patterns granted by this token.
    pub capabilities: CapabilitySet,
    /// Absolute expiry.
    pub exp: DateTime<Utc>,
}

/// Failures arising from token verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The token was not valid base64/JSON, or had no signature segment.
    #[error("malformed token")]
    Malformed,
    /// The signature did not match the expected HMAC over the payload.
    #[error("signature mismatch")]
    SignatureMismatch,
    /// The token's `exp` has already passed.
    #[error("token expired")]
    Expired,
    /// The token's `space` claim does not match the connection's target space.
    #[error("token is scoped to space '{token_space}', not '{target_space}'")]
    SpaceMismatch {
        /// Space the token was issued for.
        token_space: String,
        /// Space the connection attempt targeted.
        target_space: String,
    },
    /// A bare participant-id token was presented while insecure mode is off.
    #[error("insecure auth mode is disabled; a signed token is required")]
    InsecureModeDisabled,
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        GatewayError::new(ErrorCode::AuthViolation, err.to_string())
    }
}

/// Signs and verifies [`Claims`] as `base64(payload).base64(hmac_sha256(payload))`,
/// the gateway's own HMAC secret being the sole key.
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    /// Build a codec over the given shared secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// Sign `claims`, producing a token string suitable for a bearer header
    /// or `?token=` query parameter.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims).map_err(|_| AuthError::Malformed)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);
        let sig = self.compute_signature(payload_b64.as_bytes());
        Ok(format!("{payload_b64}.{sig}"))
    }

    /// Verify a signed token, checking the signature, expiry, and space
    /// binding in that order.
    pub fn verify(&self, token: &str, target_space: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let (payload_b64, sig) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let expected = self.compute_signature(payload_b64.as_bytes());
        if !constant_time_eq(expected.as_bytes(), sig.as_bytes()) {
            return Err(AuthError::SignatureMismatch);
        }

        let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| AuthError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| AuthError::Malformed)?;

        if claims.exp <= now {
            return Err(AuthError::Expired);
        }
        if claims.space != target_space {
            return Err(AuthError::SpaceMismatch {
                token_space: claims.space,
                target_space: target_space.to_string(),
            });
        }
        Ok(claims)
    }

    /// Resolve a raw bearer token/query value into [`Claims`], honoring
    /// insecure mode: when `insecure` is `true` and the token does not
    /// parse as a signed claim, it is treated as a bare participant id
    /// granted `default_capabilities`.
    pub fn resolve(
        &self,
        token: &str,
        target_space: &str,
        insecure: bool,
        default_capabilities: CapabilitySet,
        now: DateTime<Utc>,
    ) -> Result<Claims, AuthError> {
        match self.verify(token, target_space, now) {
            Ok(claims) => Ok(claims),
            Err(signed_err) => {
                if !insecure {
                    return Err(signed_err);
                }
                if token.is_empty() || token.contains('.') {
                    return Err(AuthError::Malformed);
                }
                Ok(Claims {
                    participant_id: token.to_string(),
                    space: target_space.to_string(),
                    capabilities: default_capabilities,
                    exp: now + chrono::Duration::days(365),
                })
            }
        }
    }

    fn compute_signature(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
