//! Activity journal for workflow durability.
//!
//! Each completed activity appends one JSON line with its recorded result to
//! `journal.jsonl` inside the codebase's staging directory. A re-instantiated
//! workflow replays recorded payloads for effectful activities (the manifest)
//! and recomputes activities that are pure over the staged inputs, so a
//! restart never repeats committed work incorrectly.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub activity: String,
    pub completed_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

pub struct Journal {
    path: PathBuf,
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Open (or start) the journal at `path`, tolerating a truncated final
    /// line from a crashed run.
    pub fn open(path: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        if path.exists() {
            let data = std::fs::read_to_string(path).context("failed to read journal")?;
            for line in data.lines() {
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(_) => {
                        tracing::warn!("dropping malformed journal line in {}", path.display());
                        break;
                    }
                }
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Recorded payload of a completed activity, if any.
    pub fn lookup<T: DeserializeOwned>(&self, activity: &str) -> Option<T> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.activity == activity)
            .and_then(|e| serde_json::from_value(e.payload.clone()).ok())
    }

    pub fn is_recorded(&self, activity: &str) -> bool {
        self.entries.iter().any(|e| e.activity == activity)
    }

    /// Record an activity completion. Append-only.
    pub fn record<T: Serialize>(&mut self, activity: &str, payload: &T) -> Result<()> {
        let entry = JournalEntry {
            activity: activity.to_string(),
            completed_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("failed to open journal for append")?;
        let line = serde_json::to_string(&entry)?;
        writeln!(file, "{line}")?;

        self.entries.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut journal = Journal::open(&path).unwrap();

        assert!(!journal.is_recorded("materialise"));
        journal.record("materialise", &vec!["a.py", "b.py"]).unwrap();
        assert!(journal.is_recorded("materialise"));

        let files: Vec<String> = journal.lookup("materialise").unwrap();
        assert_eq!(files, vec!["a.py", "b.py"]);
    }

    #[test]
    fn test_reopen_replays_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.record("validate", &"archive").unwrap();
            journal.record("scan_parse", &42u32).unwrap();
        }

        let reopened = Journal::open(&path).unwrap();
        assert!(reopened.is_recorded("validate"));
        assert_eq!(reopened.lookup::<u32>("scan_parse"), Some(42));
        assert!(!reopened.is_recorded("index"));
    }

    #[test]
    fn test_truncated_final_line_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.record("validate", &"archive").unwrap();
        }
        // Simulate a crash mid-write.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"activity\":\"mater").unwrap();
        drop(file);

        let reopened = Journal::open(&path).unwrap();
        assert!(reopened.is_recorded("validate"));
        assert!(!reopened.is_recorded("materialise"));
    }

    #[test]
    fn test_latest_record_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut journal = Journal::open(&path).unwrap();
        journal.record("index", &1u32).unwrap();
        journal.record("index", &2u32).unwrap();
        assert_eq!(journal.lookup::<u32>("index"), Some(2));
    }
}
