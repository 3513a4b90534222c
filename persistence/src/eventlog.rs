//! Per-session event journal: `<state_dir>/runs/<run_id>/events.ndjson`
//! plus a `state.json` snapshot, generalizing the teacher's rollout
//! logging conventions into a plain ndjson journal. An event is flushed
//! to disk before the transition it describes is considered committed;
//! on a corrupt or missing snapshot the session rebuilds by replaying
//! the journal to fixed-point.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use ratchet_types::{Event, SessionState};

use crate::error::Result;

/// Log files above this size are rotated, keeping one prior generation
/// (`events.ndjson.1`).
const ROTATE_THRESHOLD_BYTES: u64 = 32 * 1024 * 1024;

pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub fn new(state_dir: &Path, run_id: uuid::Uuid) -> Result<Self> {
        let root = state_dir.join("runs").join(run_id.to_string());
        fs::create_dir_all(root.join("artifacts"))?;
        Ok(Self { root })
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join("events.ndjson")
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let path = self.events_path();
        let Ok(meta) = fs::metadata(&path) else {
            return Ok(());
        };
        if meta.len() > ROTATE_THRESHOLD_BYTES {
            let rotated = self.root.join("events.ndjson.1");
            fs::rename(&path, rotated)?;
        }
        Ok(())
    }

    /// Append one event, fsync'd before returning. Callers must write the
    /// event before applying the state transition it describes.
    pub fn append_event(&self, event: &Event) -> Result<()> {
        self.rotate_if_needed()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        file.sync_all()?;
        Ok(())
    }

    /// Snapshot the session state atomically: write-to-temp, then rename
    /// on the same filesystem.
    pub fn snapshot_state(&self, state: &SessionState) -> Result<()> {
        let tmp_path = self.root.join("state.json.tmp");
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, self.state_path())?;
        Ok(())
    }

    /// Load the last snapshot, or `None` if absent or corrupt — callers
    /// should fall back to [`replay_events`] in that case.
    pub fn load_state(&self) -> Option<SessionState> {
        let bytes = fs::read(self.state_path()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Read every event recorded so far, in append order (current
    /// generation only; the rotated `.1` file is history, not replayed).
    pub fn replay_events(&self) -> Result<Vec<Event>> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_types::EventType;
    use uuid::Uuid;

    #[test]
    fn append_and_replay_round_trips_events() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let run_dir = RunDir::new(dir.path(), run_id).unwrap();

        let event = Event::new(run_id, 0, EventType::SessionStarted, serde_json::json!({}));
        run_dir.append_event(&event).unwrap();

        let replayed = run_dir.replay_events().unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].event_type, EventType::SessionStarted);
    }

    #[test]
    fn missing_state_snapshot_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::new(dir.path(), Uuid::new_v4()).unwrap();
        assert!(run_dir.load_state().is_none());
    }

    #[test]
    fn snapshot_then_load_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let run_dir = RunDir::new(dir.path(), run_id).unwrap();

        let state = SessionState::new(run_id);
        run_dir.snapshot_state(&state).unwrap();

        let loaded = run_dir.load_state().unwrap();
        assert_eq!(loaded.run_id, run_id);
    }

    #[test]
    fn corrupt_state_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let run_dir = RunDir::new(dir.path(), run_id).unwrap();

        fs::write(run_dir.state_path(), b"not json").unwrap();
        assert!(run_dir.load_state().is_none());
    }
}
