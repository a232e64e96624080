// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-policy
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Grant authorization policy (`spec` §4.6): "a participant may only grant
//! capabilities it holds, unless it possesses a meta-capability
//! `capability/*`". This crate answers exactly that question; the grant
//! lifecycle itself (requesting, acknowledging, revoking on disconnect)
//! lives in `mew-router`.

use mew_capability::CapabilityMatcher;
use mew_core::{CapabilityPattern, CapabilitySet, Envelope};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The outcome of a policy check, with a human-readable reason on denial.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Decision {
    /// Whether the action is permitted.
    pub allowed: bool,
    /// Why the action was denied; absent when `allowed` is `true`.
    pub reason: Option<String>,
}

impl Decision {
    /// A permitting decision.
    #[must_use]
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    /// A denying decision carrying an explanation for the `system/error`
    /// envelope the router sends back to the caller.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()) }
    }

    /// Whether this decision permits the action.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Decides whether a participant may grant a given capability pattern to
/// another participant, given the granter's own held capability set.
#[derive(Default)]
pub struct GrantPolicy {
    matcher: CapabilityMatcher,
}

impl GrantPolicy {
    /// Construct a fresh grant policy with an empty compiled-pattern cache.
    #[must_use]
    pub fn new() -> Self {
        Self { matcher: CapabilityMatcher::new() }
    }

    /// Check whether `granter_capabilities` authorizes granting
    /// `requested` to some grantee.
    ///
    /// A granter holding the meta-capability `capability/*` may grant
    /// anything. Otherwise a requested simple-kind pattern (e.g.
    /// `"mcp/request"`, `"chat"`) is authorized only if it would itself be
    /// allowed under the granter's held set — this lets a granter holding
    /// `"mcp/*"` grant the narrower `"mcp/request"`, but not vice versa.
    /// Structured (object) patterns must match one of the granter's held
    /// patterns exactly; subsuming an object pattern by a wildcard glob
    /// isn't well-defined, so it is conservatively denied.
    #[must_use]
    pub fn can_grant(&self, granter_capabilities: &CapabilitySet, requested: &CapabilityPattern) -> Decision {
        if granter_capabilities
            .iter()
            .any(|c| c.as_value() == CapabilityPattern::grant_wildcard().as_value())
        {
            return Decision::allow();
        }

        match requested.as_value() {
            serde_json::Value::String(kind) => {
                let probe = Envelope::originate("__grant_probe__", kind.clone(), serde_json::json!({}));
                if self.matcher.evaluate(granter_capabilities, &probe).is_allowed() {
                    Decision::allow()
                } else {
                    Decision::deny(format!(
                        "granter does not hold a capability covering '{kind}'"
                    ))
                }
            }
            other => {
                if granter_capabilities.iter().any(|c| c.as_value() == other) {
                    Decision::allow()
                } else {
                    Decision::deny("granter does not hold this structured capability exactly")
                }
            }
        }
    }
}
