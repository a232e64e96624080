// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-stream
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stream handshake state machine (`spec` §4.7):
//! `requested → open → active → closed`, namespace assignment, and
//! per-sender monotonic sequence enforcement for `stream/data`.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use mew_core::{StreamDirection, StreamInfo};
use serde_json::Value;

/// A stream's position in its handshake lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// `stream/open` has been emitted but no data has flowed yet.
    Open,
    /// At least one `stream/data` envelope has been accepted.
    Active,
    /// The stream has been closed and no longer accepts data.
    Closed,
}

struct StreamEntry {
    info: StreamInfo,
    state: StreamState,
    last_sequence: HashMap<String, u64>,
    last_activity: chrono::DateTime<Utc>,
}

/// Error returned by [`StreamManager::record_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDataError {
    /// `stream_id` does not refer to an open or active stream.
    UnknownStream,
    /// The stream has already been closed.
    StreamClosed,
    /// The sequence number was not strictly greater than the sender's last
    /// accepted sequence on this stream (`spec` §4.7: out-of-order or
    /// duplicate sequences are dropped with `stream_sequence_violation`).
    SequenceViolation { expected_greater_than: u64, got: u64 },
}

/// Tracks every stream open within a single space.
#[derive(Default)]
pub struct StreamManager {
    streams: RwLock<HashMap<String, StreamEntry>>,
}

impl StreamManager {
    /// Construct an empty stream manager for one space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a `stream/request`: assign a fresh `stream_id` and namespace
    /// and transition directly to `open` (`spec` §4.7's `requested` state is
    /// the instant before this call returns; the manager only stores
    /// post-assignment state).
    pub fn request(
        &self,
        space: &str,
        owner: impl Into<String>,
        direction: StreamDirection,
        metadata: Value,
    ) -> StreamInfo {
        let stream_id = uuid::Uuid::new_v4().to_string();
        let namespace = StreamInfo::namespace_for(space, &stream_id);
        let info = StreamInfo {
            stream_id: stream_id.clone(),
            namespace,
            owner: owner.into(),
            direction,
            created: Utc::now(),
            metadata,
        };
        self.streams.write().expect("stream table lock poisoned").insert(
            stream_id,
            StreamEntry {
                info: info.clone(),
                state: StreamState::Open,
                last_sequence: HashMap::new(),
                last_activity: info.created,
            },
        );
        info
    }

    /// Validate and record one `stream/data` envelope's sequence number,
    /// transitioning the stream to `active` on its first accepted datum.
    pub fn record_data(&self, stream_id: &str, sender: &str, seq: u64) -> Result<(), StreamDataError> {
        self.record_data_at(stream_id, sender, seq, Utc::now())
    }

    fn record_data_at(
        &self,
        stream_id: &str,
        sender: &str,
        seq: u64,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), StreamDataError> {
        let mut streams = self.streams.write().expect("stream table lock poisoned");
        let entry = streams.get_mut(stream_id).ok_or(StreamDataError::UnknownStream)?;
        if entry.state == StreamState::Closed {
            return Err(StreamDataError::StreamClosed);
        }
        if let Some(&last) = entry.last_sequence.get(sender) {
            if seq <= last {
                return Err(StreamDataError::SequenceViolation { expected_greater_than: last, got: seq });
            }
        }
        entry.last_sequence.insert(sender.to_string(), seq);
        entry.state = StreamState::Active;
        entry.last_activity = now;
        Ok(())
    }

    /// Close a stream, e.g. on `stream/close`, `stream/complete`,
    /// `stream/error`, or the owner's disconnection. Returns the stream's
    /// last known descriptor, if it existed.
    pub fn close(&self, stream_id: &str) -> Option<StreamInfo> {
        let mut streams = self.streams.write().expect("stream table lock poisoned");
        let entry = streams.get_mut(stream_id)?;
        entry.state = StreamState::Closed;
        Some(entry.info.clone())
    }

    /// Close every stream owned by `owner`, for use on disconnection.
    /// Returns the descriptors of the streams that were closed.
    pub fn close_all_owned_by(&self, owner: &str) -> Vec<StreamInfo> {
        let mut streams = self.streams.write().expect("stream table lock poisoned");
        let mut closed = Vec::new();
        for entry in streams.values_mut() {
            if entry.info.owner == owner && entry.state != StreamState::Closed {
                entry.state = StreamState::Closed;
                closed.push(entry.info.clone());
            }
        }
        closed
    }

    /// Close every open/active stream that has seen no `stream/data` (and,
    /// for a stream with none yet, no activity since its `stream/request`)
    /// for at least `timeout` as of `now` (`spec` §5: "stream inactivity
    /// (configurable; default disabled)"). Returns the descriptors closed.
    pub fn close_inactive_since(&self, timeout: chrono::Duration, now: chrono::DateTime<Utc>) -> Vec<StreamInfo> {
        let mut streams = self.streams.write().expect("stream table lock poisoned");
        let mut closed = Vec::new();
        for entry in streams.values_mut() {
            if entry.state == StreamState::Closed {
                continue;
            }
            if now - entry.last_activity >= timeout {
                entry.state = StreamState::Closed;
                closed.push(entry.info.clone());
            }
        }
        closed
    }

    /// Descriptors of every stream not yet closed, for `system/welcome`'s
    /// `active_streams` and late-joiner visibility (`spec` §4.7).
    #[must_use]
    pub fn active_streams(&self) -> Vec<StreamInfo> {
        self.streams
            .read()
            .expect("stream table lock poisoned")
            .values()
            .filter(|e| e.state != StreamState::Closed)
            .map(|e| e.info.clone())
            .collect()
    }

    /// The current lifecycle state of a stream, if known.
    #[must_use]
    pub fn state_of(&self, stream_id: &str) -> Option<StreamState> {
        self.streams.read().expect("stream table lock poisoned").get(stream_id).map(|e| e.state)
    }
}
