//! Optional per-message ndjson trace, for post-hoc debugging of an
//! execute-role run. A backend writes one line per turn (prompt sent,
//! tool call dispatched, tool result, final response); absent a sink the
//! backend runs exactly as it would with one configured, so tracing is
//! free to omit in the common case.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct TraceLine<'a> {
    ts: chrono::DateTime<Utc>,
    kind: &'a str,
    detail: serde_json::Value,
}

/// Appends ndjson lines to a fixed path. Cheap to construct per run;
/// internally serializes writes so a future multi-threaded execute loop
/// doesn't interleave partial lines.
pub struct TraceSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TraceSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn record(&self, kind: &str, detail: serde_json::Value) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = TraceLine {
            ts: Utc::now(),
            kind,
            detail,
        };
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&line)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_ndjson_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TraceSink::new(dir.path().join("trace.ndjson"));

        sink.record("prompt", serde_json::json!({"len": 10})).unwrap();
        sink.record("tool_call", serde_json::json!({"name": "read_file"}))
            .unwrap();

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("tool_call"));
    }
}
