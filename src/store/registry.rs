//! Codebase registry: the shared metadata store for codebases and their
//! ingestion state, persisted as JSON.
//!
//! Status advances monotonically (queued → processing → completed | failed)
//! and counts freeze once a codebase completes; the helpers here enforce
//! both.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Codebase, CodebaseStatus, IngestStep, StatusProjection};

pub struct CodebaseRegistry {
    inner: RwLock<HashMap<Uuid, Codebase>>,
    persist_path: Option<PathBuf>,
}

impl CodebaseRegistry {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            persist_path: None,
        }
    }

    pub fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let map = if path.exists() {
            let data = std::fs::read_to_string(path).context("failed to read codebase registry")?;
            let list: Vec<Codebase> = serde_json::from_str(&data).unwrap_or_default();
            list.into_iter().map(|cb| (cb.id, cb)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            inner: RwLock::new(map),
            persist_path: Some(path.to_path_buf()),
        })
    }

    pub fn insert(&self, codebase: Codebase) {
        let mut map = self.inner.write();
        map.insert(codebase.id, codebase);
        self.persist(&map);
    }

    pub fn get(&self, id: Uuid) -> Option<Codebase> {
        self.inner.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Codebase> {
        let mut all: Vec<Codebase> = self.inner.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn remove(&self, id: Uuid) -> Option<Codebase> {
        let mut map = self.inner.write();
        let removed = map.remove(&id);
        if removed.is_some() {
            self.persist(&map);
        }
        removed
    }

    /// Apply an arbitrary mutation. Touches `updated_at` and persists.
    pub fn update<F>(&self, id: Uuid, mutate: F) -> Result<Codebase, EngineError>
    where
        F: FnOnce(&mut Codebase),
    {
        let mut map = self.inner.write();
        let codebase = map.get_mut(&id).ok_or(EngineError::CodebaseNotFound(id))?;
        mutate(codebase);
        codebase.updated_at = Utc::now();
        let snapshot = codebase.clone();
        self.persist(&map);
        Ok(snapshot)
    }

    /// Advance the lifecycle status. Backwards transitions and transitions
    /// out of a terminal state are invariant violations.
    pub fn advance_status(&self, id: Uuid, next: CodebaseStatus) -> Result<(), EngineError> {
        self.update(id, |cb| {
            let legal = matches!(
                (cb.status, next),
                (CodebaseStatus::Queued, CodebaseStatus::Processing)
                    | (CodebaseStatus::Queued, CodebaseStatus::Failed)
                    | (CodebaseStatus::Processing, CodebaseStatus::Completed)
                    | (CodebaseStatus::Processing, CodebaseStatus::Failed)
            ) || cb.status == next;

            if !legal {
                tracing::error!(
                    "illegal status transition for {}: {} → {}",
                    cb.id,
                    cb.status,
                    next
                );
                return;
            }
            cb.status = next;
            match next {
                CodebaseStatus::Processing => {
                    if cb.started_at.is_none() {
                        cb.started_at = Some(Utc::now());
                    }
                }
                CodebaseStatus::Completed | CodebaseStatus::Failed => {
                    cb.completed_at = Some(Utc::now());
                }
                CodebaseStatus::Queued => {}
            }
        })
        .map(|_| ())
    }

    pub fn set_step(&self, id: Uuid, step: IngestStep) {
        let _ = self.update(id, |cb| {
            if !cb.status.is_terminal() {
                cb.current_step = Some(step);
            }
        });
    }

    /// Bump the processed-files counter. Frozen after completion and clamped
    /// so `processed ≤ total` holds at every observed state.
    pub fn record_progress(&self, id: Uuid, processed_files: usize) {
        let _ = self.update(id, |cb| {
            if cb.status == CodebaseStatus::Completed {
                return;
            }
            cb.processed_files = processed_files.min(cb.total_files).max(cb.processed_files);
        });
    }

    /// Read model for the status endpoint.
    pub fn status_projection(&self, id: Uuid) -> Option<StatusProjection> {
        let codebase = self.get(id)?;

        let progress = match codebase.status {
            CodebaseStatus::Queued => 0.0,
            CodebaseStatus::Completed => 100.0,
            CodebaseStatus::Failed | CodebaseStatus::Processing => {
                let base: f32 = match codebase.current_step {
                    None => 0.0,
                    Some(IngestStep::Validating) => 5.0,
                    Some(IngestStep::Cloning) => 15.0,
                    Some(IngestStep::Parsing) => 35.0,
                    Some(IngestStep::Chunking) => 50.0,
                    Some(IngestStep::Embedding) => 65.0,
                    Some(IngestStep::Indexing) => 80.0,
                    Some(IngestStep::Complete) => 100.0,
                };
                if codebase.current_step == Some(IngestStep::Indexing) && codebase.total_files > 0 {
                    base + 20.0 * codebase.processed_files as f32 / codebase.total_files as f32
                } else {
                    base
                }
            }
        };

        Some(StatusProjection {
            codebase_id: codebase.id,
            status: codebase.status,
            progress: progress.clamp(0.0, 100.0),
            total_files: codebase.total_files,
            processed_files: codebase.processed_files,
            current_step: codebase.current_step,
            error: codebase.error,
            secrets_detected: if codebase.secret_summary.is_empty() {
                None
            } else {
                Some(codebase.secret_summary)
            },
            started_at: codebase.started_at,
            completed_at: codebase.completed_at,
        })
    }

    fn persist(&self, map: &HashMap<Uuid, Codebase>) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let mut list: Vec<&Codebase> = map.values().collect();
        list.sort_by_key(|cb| cb.created_at);
        if let Ok(data) = serde_json::to_string_pretty(&list) {
            let tmp = path.with_extension("json.tmp");
            if std::fs::write(&tmp, &data).is_ok() {
                let _ = std::fs::rename(&tmp, path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    fn registry_with_codebase() -> (CodebaseRegistry, Uuid) {
        let registry = CodebaseRegistry::in_memory();
        let codebase = Codebase::new("test".to_string(), None, SourceKind::Archive);
        let id = codebase.id;
        registry.insert(codebase);
        (registry, id)
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let (registry, id) = registry_with_codebase();
        assert_eq!(registry.get(id).unwrap().status, CodebaseStatus::Queued);

        registry.advance_status(id, CodebaseStatus::Processing).unwrap();
        let cb = registry.get(id).unwrap();
        assert_eq!(cb.status, CodebaseStatus::Processing);
        assert!(cb.started_at.is_some());

        registry.advance_status(id, CodebaseStatus::Completed).unwrap();
        let cb = registry.get(id).unwrap();
        assert_eq!(cb.status, CodebaseStatus::Completed);
        assert!(cb.completed_at.is_some());
    }

    #[test]
    fn test_illegal_transition_ignored() {
        let (registry, id) = registry_with_codebase();
        registry.advance_status(id, CodebaseStatus::Processing).unwrap();
        registry.advance_status(id, CodebaseStatus::Completed).unwrap();

        // Completed is terminal; a later failure must not regress it.
        registry.advance_status(id, CodebaseStatus::Failed).unwrap();
        assert_eq!(registry.get(id).unwrap().status, CodebaseStatus::Completed);

        registry.advance_status(id, CodebaseStatus::Queued).unwrap();
        assert_eq!(registry.get(id).unwrap().status, CodebaseStatus::Completed);
    }

    #[test]
    fn test_progress_clamped_and_frozen() {
        let (registry, id) = registry_with_codebase();
        registry.update(id, |cb| cb.total_files = 5).unwrap();
        registry.advance_status(id, CodebaseStatus::Processing).unwrap();

        registry.record_progress(id, 3);
        assert_eq!(registry.get(id).unwrap().processed_files, 3);

        // processed ≤ total even if a caller overshoots.
        registry.record_progress(id, 99);
        assert_eq!(registry.get(id).unwrap().processed_files, 5);

        registry.advance_status(id, CodebaseStatus::Completed).unwrap();
        registry.record_progress(id, 1);
        assert_eq!(registry.get(id).unwrap().processed_files, 5);
    }

    #[test]
    fn test_progress_never_regresses() {
        let (registry, id) = registry_with_codebase();
        registry.update(id, |cb| cb.total_files = 10).unwrap();
        registry.record_progress(id, 4);
        registry.record_progress(id, 2);
        assert_eq!(registry.get(id).unwrap().processed_files, 4);
    }

    #[test]
    fn test_status_projection_progress() {
        let (registry, id) = registry_with_codebase();
        registry.update(id, |cb| cb.total_files = 4).unwrap();

        let p = registry.status_projection(id).unwrap();
        assert_eq!(p.progress, 0.0);
        assert_eq!(p.status, CodebaseStatus::Queued);

        registry.advance_status(id, CodebaseStatus::Processing).unwrap();
        registry.set_step(id, IngestStep::Indexing);
        registry.record_progress(id, 2);
        let p = registry.status_projection(id).unwrap();
        assert_eq!(p.progress, 90.0);
        assert_eq!(p.current_step, Some(IngestStep::Indexing));

        registry.advance_status(id, CodebaseStatus::Completed).unwrap();
        let p = registry.status_projection(id).unwrap();
        assert_eq!(p.progress, 100.0);
    }

    #[test]
    fn test_projection_hides_empty_secret_summary() {
        let (registry, id) = registry_with_codebase();
        assert!(registry.status_projection(id).unwrap().secrets_detected.is_none());
    }

    #[test]
    fn test_unknown_codebase() {
        let registry = CodebaseRegistry::in_memory();
        assert!(registry.get(Uuid::new_v4()).is_none());
        assert!(registry.status_projection(Uuid::new_v4()).is_none());
        assert!(matches!(
            registry.update(Uuid::new_v4(), |_| {}),
            Err(EngineError::CodebaseNotFound(_))
        ));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codebases.json");
        let id = {
            let registry = CodebaseRegistry::open_or_create(&path).unwrap();
            let codebase = Codebase::new("persisted".to_string(), None, SourceKind::RemoteUrl);
            let id = codebase.id;
            registry.insert(codebase);
            id
        };

        let reopened = CodebaseRegistry::open_or_create(&path).unwrap();
        let cb = reopened.get(id).unwrap();
        assert_eq!(cb.name, "persisted");
        assert_eq!(cb.source_kind, SourceKind::RemoteUrl);
    }

    #[test]
    fn test_list_sorted_newest_first() {
        let registry = CodebaseRegistry::in_memory();
        let mut first = Codebase::new("first".to_string(), None, SourceKind::Archive);
        first.created_at = Utc::now() - chrono::Duration::hours(1);
        registry.insert(first);
        registry.insert(Codebase::new("second".to_string(), None, SourceKind::Archive));

        let list = registry.list();
        assert_eq!(list[0].name, "second");
        assert_eq!(list[1].name, "first");
    }
}
