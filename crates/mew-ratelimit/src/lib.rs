// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-ratelimit
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Per-participant message rate limiting (`spec` §4.3/§4.4): a general
//! messages-per-minute cap plus a narrower chat-specific cap, each a
//! rolling window of timestamps retained over the last 60 seconds.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A single rolling one-minute window over recorded events.
#[derive(Debug, Clone)]
struct RollingWindow {
    limit: u32,
    timestamps: Vec<Instant>,
}

impl RollingWindow {
    fn new(limit: u32) -> Self {
        Self { limit, timestamps: Vec::new() }
    }

    /// Record an event at `now` and report whether the window is still
    /// under its limit, including this event.
    fn check_and_record(&mut self, now: Instant) -> bool {
        let window_start = now.checked_sub(Duration::from_secs(60)).unwrap_or(now);
        self.timestamps.retain(|t| *t > window_start);
        if self.timestamps.len() >= self.limit as usize {
            return false;
        }
        self.timestamps.push(now);
        true
    }
}

/// The two rate counters tracked for a single participant: a general
/// messages/min cap and a narrower chat-only cap (`spec` §4.3).
struct ParticipantWindows {
    general: RollingWindow,
    chat: RollingWindow,
}

/// Verdict returned by [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The message may proceed.
    Allowed,
    /// The general messages/min cap was exceeded.
    GeneralLimitExceeded,
    /// The chat-specific cap was exceeded (only checked for `chat` envelopes).
    ChatLimitExceeded,
}

impl RateLimitDecision {
    /// Whether the message may proceed.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Tracks rolling-window rate limits per participant id.
pub struct RateLimiter {
    general_limit: u32,
    chat_limit: u32,
    windows: HashMap<String, ParticipantWindows>,
}

impl RateLimiter {
    /// Build a limiter with the given general and chat-specific per-minute
    /// caps (`spec` §6 defaults: 120 general, 60 chat).
    #[must_use]
    pub fn new(general_limit: u32, chat_limit: u32) -> Self {
        Self { general_limit, chat_limit, windows: HashMap::new() }
    }

    /// Check and record one message from `participant_id`, with `is_chat`
    /// indicating whether the chat-specific cap also applies.
    pub fn check(&mut self, participant_id: &str, is_chat: bool) -> RateLimitDecision {
        self.check_at(participant_id, is_chat, Instant::now())
    }

    fn check_at(&mut self, participant_id: &str, is_chat: bool, now: Instant) -> RateLimitDecision {
        let general_limit = self.general_limit;
        let chat_limit = self.chat_limit;
        let windows = self.windows.entry(participant_id.to_string()).or_insert_with(|| {
            ParticipantWindows { general: RollingWindow::new(general_limit), chat: RollingWindow::new(chat_limit) }
        });

        if !windows.general.check_and_record(now) {
            return RateLimitDecision::GeneralLimitExceeded;
        }
        if is_chat && !windows.chat.check_and_record(now) {
            return RateLimitDecision::ChatLimitExceeded;
        }
        RateLimitDecision::Allowed
    }

    /// Drop a participant's counters, e.g. on disconnect.
    pub fn remove(&mut self, participant_id: &str) {
        self.windows.remove(participant_id);
    }
}
