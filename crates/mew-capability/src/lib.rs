// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-capability
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Structural capability pattern matching for the MEW gateway.
//! A capability pattern is a JSON template; matching an envelope against it
//! walks both trees in lockstep, with string leaves compiled into
//! glob/regex/literal matchers and a leading `!` negating either a whole
//! capability's polarity (top level) or a single field (nested). The
//! [`CapabilityMatcher`] in [`cache`] adds compiled-pattern and decision
//! caching; everything in [`matcher`] itself is pure and stateless.

mod cache;
mod matcher;

pub use cache::CapabilityMatcher;
pub use matcher::MatchDecision;
