//! Append-only, per-turn consultation persistence.
//!
//! Layout:
//!
//! ```text
//! <base>/CONSULT-abc12345/
//!     CONSULT-abc12345_TURN-001.json
//!     CONSULT-abc12345_TURN-002.json
//! ```
//!
//! One pretty-printed canonical snapshot per turn, never overwritten.  The
//! scheme buys time-travel debugging and restart resilience for free, and
//! turns a double-submitted turn (a turn-counter bug or transport reorder)
//! into a loud failure instead of silent corruption.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use iris_core::ConsultationState;

#[derive(Debug, Clone)]
pub struct TurnStore {
    base_dir: PathBuf,
}

impl TurnStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Persist one turn.  Writing an existing turn file is fatal.
    pub fn save_turn(&self, consultation_id: &str, state: &ConsultationState) -> Result<PathBuf> {
        let dir = self.consultation_dir(consultation_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;

        let turn_count = state.turn_count();
        let path = dir.join(format!("CONSULT-{consultation_id}_TURN-{turn_count:03}.json"));
        if path.exists() {
            bail!(
                "turn file already exists: {} (double-submit or turn-counter corruption)",
                path.display()
            );
        }

        let rendered = serde_json::to_string_pretty(&state.to_json())?;
        std::fs::write(&path, rendered)
            .with_context(|| format!("cannot write {}", path.display()))?;
        info!(consultation_id, turn_count, "turn persisted");
        Ok(path)
    }

    /// Load the highest-numbered turn, or `None` for an unknown
    /// consultation.
    pub fn load_latest_turn(&self, consultation_id: &str) -> Result<Option<ConsultationState>> {
        let Some(path) = self.latest_turn_path(consultation_id)? else {
            warn!(consultation_id, "no persisted turns found");
            return Ok(None);
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let data: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt turn file {}", path.display()))?;
        info!(consultation_id, path = %path.display(), "latest turn loaded");
        Ok(Some(ConsultationState::from_json(data)))
    }

    pub fn consultation_exists(&self, consultation_id: &str) -> bool {
        matches!(self.latest_turn_path(consultation_id), Ok(Some(_)))
    }

    /// Number of persisted turn files for a consultation.
    pub fn turn_count(&self, consultation_id: &str) -> Result<usize> {
        Ok(self.turn_files(consultation_id)?.len())
    }

    fn consultation_dir(&self, consultation_id: &str) -> PathBuf {
        self.base_dir.join(format!("CONSULT-{consultation_id}"))
    }

    fn latest_turn_path(&self, consultation_id: &str) -> Result<Option<PathBuf>> {
        let files = self.turn_files(consultation_id)?;
        Ok(files.into_iter().max_by_key(|(turn, _)| *turn).map(|(_, path)| path))
    }

    fn turn_files(&self, consultation_id: &str) -> Result<Vec<(u64, PathBuf)>> {
        let dir = self.consultation_dir(consultation_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("CONSULT-{consultation_id}_TURN-");
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(turn) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|digits| digits.parse::<u64>().ok())
            else {
                continue;
            };
            files.push((turn, path));
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use iris_core::ConsultationState;
    use serde_json::json;

    use super::TurnStore;

    fn state(turn_count: u64) -> ConsultationState {
        ConsultationState::from_json(json!({
            "consultation_id": "abc12345",
            "turn_count": turn_count,
            "episodes": [],
        }))
    }

    #[test]
    fn saves_and_reloads_the_latest_turn() {
        let dir = tempfile::tempdir().unwrap();
        let store = TurnStore::new(dir.path());

        store.save_turn("abc12345", &state(1)).unwrap();
        store.save_turn("abc12345", &state(2)).unwrap();
        store.save_turn("abc12345", &state(3)).unwrap();

        let latest = store.load_latest_turn("abc12345").unwrap().unwrap();
        assert_eq!(latest.turn_count(), 3);
        assert_eq!(store.turn_count("abc12345").unwrap(), 3);
    }

    #[test]
    fn double_submit_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = TurnStore::new(dir.path());

        store.save_turn("abc12345", &state(7)).unwrap();
        let err = store.save_turn("abc12345", &state(7)).unwrap_err().to_string();
        assert!(err.contains("double-submit"));
        // The original file is untouched.
        assert_eq!(store.turn_count("abc12345").unwrap(), 1);
    }

    #[test]
    fn unknown_consultation_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TurnStore::new(dir.path());
        assert!(store.load_latest_turn("missing0").unwrap().is_none());
        assert!(!store.consultation_exists("missing0"));
    }

    #[test]
    fn crash_and_restart_resumes_from_the_last_committed_turn() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TurnStore::new(dir.path());
            for turn in 1..=7 {
                store.save_turn("abc12345", &state(turn)).unwrap();
            }
        }

        // A fresh store (new process) sees the turn-7 envelope and the next
        // turn persists as turn 8 with no gap or duplicate.
        let store = TurnStore::new(dir.path());
        let latest = store.load_latest_turn("abc12345").unwrap().unwrap();
        assert_eq!(latest.turn_count(), 7);
        store.save_turn("abc12345", &state(8)).unwrap();
        assert_eq!(store.turn_count("abc12345").unwrap(), 8);
    }
}
