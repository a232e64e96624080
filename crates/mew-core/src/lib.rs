// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Core data model for the MEW gateway: the [`Envelope`] wire unit,
//! [`CapabilityPattern`]s, participant/stream summaries, and the bookkeeping
//! records the router keeps per space (proposals, grants). Behavior —
//! matching, routing, lifecycle — lives in the crates built on top of this
//! one (`mew-protocol`, `mew-capability`, `mew-router`, `mew-stream`).

pub mod capability;
pub mod envelope;
pub mod grant;
pub mod participant;
pub mod proposal;
pub mod stream;
pub mod welcome;

pub use capability::{default_capabilities, CapabilityPattern, CapabilitySet};
pub use envelope::{Envelope, PROTOCOL_TAG};
pub use grant::GrantRecord;
pub use participant::{DisconnectReason, ParticipantSummary};
pub use proposal::ProposalRecord;
pub use stream::{StreamDirection, StreamInfo};
pub use welcome::WelcomePayload;
