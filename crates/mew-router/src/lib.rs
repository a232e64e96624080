// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-router
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Per-space routing (`spec` §4.4), the proposal and grant engines
//! (`spec` §4.5/§4.6), and the space-owner actor that serializes all of
//! it (`spec` §5). Everything downstream of envelope decoding and
//! authentication lives here; `mew-gateway` owns the connection layer
//! that feeds this crate its commands.

mod events;
mod grant;
mod owner;
mod proposal;
mod router;
mod state;

pub use events::{NullObserver, SpaceObserver};
pub use owner::{SpaceCommand, SpaceOwner};
pub use router::{route, RouteReport};
pub use state::SpaceState;

pub use grant::{acknowledge, authorize_and_record_grant, revoke_all_for, revoke_explicit};
pub use proposal::{expire_due, record_proposal, try_fulfill};
