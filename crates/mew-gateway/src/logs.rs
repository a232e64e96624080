//! Persisted per-space state (`spec` §6): `envelope-history.jsonl`,
//! `capability-decisions.jsonl`, and per-participant `output_log` files for
//! log-backed participants. Writes are small, append-only JSON lines, so a
//! blocking `std::fs` append under a `Mutex` is used rather than threading
//! `tokio::fs` through the synchronous [`SpaceObserver`]/[`ConnectionSink`]
//! trait boundaries `mew-router`/`mew-registry` define.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use mew_core::{DisconnectReason, Envelope};
use mew_registry::ConnectionSink;
use mew_router::SpaceObserver;
use serde_json::json;
use tracing::warn;

fn append_line(path: &Path, line: &str) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %err, "failed to create log directory");
            return;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path);
    match file {
        Ok(mut f) => {
            if let Err(err) = writeln!(f, "{line}") {
                warn!(path = %path.display(), error = %err, "failed to append log line");
            }
        }
        Err(err) => warn!(path = %path.display(), error = %err, "failed to open log file"),
    }
}

/// Writes `envelope-history.jsonl` and `capability-decisions.jsonl` under
/// `<logs_dir>/<space>/` for every space a gateway process serves.
pub struct JsonlObserver {
    logs_dir: PathBuf,
}

impl JsonlObserver {
    /// Build an observer rooted at `logs_dir` (`GatewayConfig::logs_dir`).
    #[must_use]
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self { logs_dir: logs_dir.into() }
    }

    fn history_path(&self, space: &str) -> PathBuf {
        self.logs_dir.join(space).join("envelope-history.jsonl")
    }

    fn decisions_path(&self, space: &str) -> PathBuf {
        self.logs_dir.join(space).join("capability-decisions.jsonl")
    }
}

impl SpaceObserver for JsonlObserver {
    fn on_envelope_recorded(&self, space: &str, envelope: &Envelope) {
        if let Ok(line) = serde_json::to_string(envelope) {
            append_line(&self.history_path(space), &line);
        }
    }

    fn on_capability_decision(
        &self,
        space: &str,
        participant: &str,
        envelope_id: &str,
        attempted_kind: &str,
        allowed: bool,
    ) {
        let line = json!({
            "event": "capability_decision",
            "participant": participant,
            "envelope_id": envelope_id,
            "attempted_kind": attempted_kind,
            "allowed": allowed,
        })
        .to_string();
        append_line(&self.decisions_path(space), &line);
    }

    fn on_participant_joined(&self, space: &str, id: &str) {
        let line = json!({"event": "participant_joined", "id": id}).to_string();
        append_line(&self.decisions_path(space), &line);
    }

    fn on_participant_left(&self, space: &str, id: &str, reason: DisconnectReason) {
        let line = json!({"event": "participant_left", "id": id, "reason": reason}).to_string();
        append_line(&self.decisions_path(space), &line);
    }
}

/// A log-file-backed virtual connection (`spec` §4.8 lazy auto-connect):
/// `send` appends the frame as one JSON line to the participant's
/// `output_log`, rather than writing to a live socket.
pub struct LogSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogSink {
    /// Build a sink appending to `<logs_dir>/<space>/participants/<id>.jsonl`.
    #[must_use]
    pub fn new(logs_dir: impl AsRef<Path>, space: &str, participant_id: &str) -> Self {
        let path = logs_dir.as_ref().join(space).join("participants").join(format!("{participant_id}.jsonl"));
        Self { path, file: Mutex::new(None) }
    }

    /// The `output_log` path this sink appends to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionSink for LogSink {
    fn send(&self, frame: &str) -> bool {
        if let Some(parent) = self.path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        let mut guard = self.file.lock().expect("log sink lock poisoned");
        if guard.is_none() {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(f) => *guard = Some(f),
                Err(_) => return false,
            }
        }
        let Some(file) = guard.as_mut() else { return false };
        writeln!(file, "{frame}").is_ok()
    }

    fn close(&self) {
        *self.file.lock().expect("log sink lock poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mew_core::CapabilitySet;
    use serde_json::Value;
    use std::fs;

    #[test]
    fn envelope_recorded_appends_a_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let observer = JsonlObserver::new(dir.path());
        let env = Envelope::originate("alice", "chat", json!({"text": "hi"}));
        observer.on_envelope_recorded("demo", &env);

        let content = fs::read_to_string(dir.path().join("demo").join("envelope-history.jsonl")).unwrap();
        let line: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(line["from"], "alice");
    }

    #[test]
    fn capability_decision_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let observer = JsonlObserver::new(dir.path());
        observer.on_capability_decision("demo", "alice", "e1", "mcp/request", false);

        let content = fs::read_to_string(dir.path().join("demo").join("capability-decisions.jsonl")).unwrap();
        let line: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(line["participant"], "alice");
        assert_eq!(line["allowed"], false);
    }

    #[test]
    fn log_sink_appends_frames_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), "demo", "bot");
        assert!(sink.send("frame-1"));
        assert!(sink.send("frame-2"));

        let content = fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().collect::<Vec<_>>(), vec!["frame-1", "frame-2"]);
    }

    #[test]
    fn log_sink_is_a_connection_sink() {
        let dir = tempfile::tempdir().unwrap();
        let sink: Box<dyn ConnectionSink> = Box::new(LogSink::new(dir.path(), "demo", "bot"));
        let _: CapabilitySet = vec![];
        assert!(sink.send("hi"));
        sink.close();
    }
}
