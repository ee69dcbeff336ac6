//! Durable ingestion workflow.
//!
//! One workflow task per codebase drives the activity sequence
//! validate → materialise → scan+parse → chunk → embed → index → finalise,
//! journalling each completion so a restarted process resumes instead of
//! starting over. Per-file problems (binary content, unsupported extensions,
//! parser failures) are warnings, not failures; activity-level failures
//! retry under the shared policy until the budget is spent, then mark the
//! codebase `failed`. Cancellation is observed at file-level checkpoints.

pub mod journal;
pub mod staging;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chunking::{Chunker, ChunkerConfig};
use crate::config::Config;
use crate::llm::{EmbedTask, Embedder};
use crate::models::{Codebase, CodebaseStatus, CodeChunk, IngestStep, SecretFileSummary, SourceKind};
use crate::parser::{self, Language, ParsedFile};
use crate::retry::{with_retry, RetryError};
use crate::secrets::SecretScanner;
use crate::store::{CodebaseRegistry, SessionStore, VectorStore};

use journal::Journal;
use staging::{FileEntry, MaterialiseMode};

/// Start-to-close bound for light activities.
const LIGHT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct IngestDeps {
    pub config: Config,
    pub registry: Arc<CodebaseRegistry>,
    pub vectors: Arc<VectorStore>,
    pub sessions: Arc<SessionStore>,
    pub embedder: Arc<dyn Embedder>,
}

struct WorkflowHandle {
    cancel: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

/// Launches and tracks ingestion workflows; concurrent ingestions of
/// different codebases are isolated.
pub struct WorkflowManager {
    deps: Arc<IngestDeps>,
    running: Mutex<HashMap<Uuid, WorkflowHandle>>,
}

impl WorkflowManager {
    pub fn new(deps: IngestDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Launch the ingestion workflow for a codebase. Returns the workflow id.
    pub fn launch(&self, codebase_id: Uuid) -> String {
        let workflow_id = format!("ingest-{codebase_id}");
        let cancel = Arc::new(AtomicBool::new(false));
        let deps = self.deps.clone();
        let task_cancel = cancel.clone();

        let _ = self
            .deps
            .registry
            .update(codebase_id, |cb| cb.workflow_id = Some(workflow_id.clone()));

        let task = tokio::spawn(async move {
            run_workflow(deps, codebase_id, task_cancel).await;
        });

        self.running
            .lock()
            .insert(codebase_id, WorkflowHandle { cancel, task });
        workflow_id
    }

    /// Signal cancellation; in-flight activities observe it at their next
    /// file-level checkpoint. Delete proceeds regardless of workflow state.
    pub fn cancel(&self, codebase_id: Uuid) {
        if let Some(handle) = self.running.lock().remove(&codebase_id) {
            handle.cancel.store(true, Ordering::Relaxed);
            tracing::info!("cancellation requested for workflow of {codebase_id}");
            // The task drains on its own; aborting here could leave staging
            // half-cleaned.
            drop(handle.task);
        }
    }

    /// Relaunch workflows for codebases that never reached a terminal state
    /// (e.g. after a process restart). Journalled activities replay.
    pub fn resume_pending(&self) -> usize {
        let mut resumed = 0;
        for codebase in self.deps.registry.list() {
            if matches!(
                codebase.status,
                CodebaseStatus::Queued | CodebaseStatus::Processing
            ) {
                tracing::info!("resuming ingestion of {} ({})", codebase.name, codebase.id);
                self.launch(codebase.id);
                resumed += 1;
            }
        }
        resumed
    }
}

enum WorkflowError {
    Cancelled,
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err)
    }
}

struct IngestStats {
    chunks_created: usize,
    secrets_total: usize,
    secret_summary: Vec<SecretFileSummary>,
}

async fn run_workflow(deps: Arc<IngestDeps>, codebase_id: Uuid, cancel: Arc<AtomicBool>) {
    let Some(codebase) = deps.registry.get(codebase_id) else {
        tracing::warn!("workflow launched for unknown codebase {codebase_id}");
        return;
    };
    // Re-running a completed ingestion is a no-op.
    if codebase.status == CodebaseStatus::Completed {
        tracing::info!("codebase {codebase_id} already completed, nothing to do");
        return;
    }

    let staging = staging::codebase_staging(&deps.config.staging_dir(), codebase_id);
    if let Err(e) = std::fs::create_dir_all(&staging) {
        let _ = deps.registry.update(codebase_id, |cb| {
            cb.error = Some(format!("failed to create staging: {e}"));
        });
        let _ = deps.registry.advance_status(codebase_id, CodebaseStatus::Failed);
        return;
    }

    let mut journal = match Journal::open(&staging.join("journal.jsonl")) {
        Ok(journal) => journal,
        Err(e) => {
            tracing::error!("journal unavailable for {codebase_id}: {e:#}");
            let _ = deps.registry.update(codebase_id, |cb| {
                cb.error = Some(format!("journal unavailable: {e}"));
            });
            let _ = deps.registry.advance_status(codebase_id, CodebaseStatus::Failed);
            return;
        }
    };

    let _ = deps.registry.advance_status(codebase_id, CodebaseStatus::Processing);
    let _ = deps.registry.update(codebase_id, |cb| {
        cb.staging_path = Some(staging.clone());
    });

    // Workflow-wide deadline shares the retry budget.
    let outcome = tokio::time::timeout(
        deps.config.retry.budget(),
        run_activities(&deps, &codebase, &mut journal, &staging, &cancel),
    )
    .await
    .unwrap_or_else(|_| {
        Err(WorkflowError::Failed(anyhow::anyhow!(
            "ingestion exceeded the {}ms budget",
            deps.config.retry.budget_ms
        )))
    });

    match outcome {
        Ok(stats) => {
            let _ = deps.registry.update(codebase_id, |cb| {
                cb.secrets_detected = stats.secrets_total;
                cb.secret_summary = stats.secret_summary.clone();
                cb.processed_files = cb.total_files;
                cb.current_step = Some(IngestStep::Complete);
                cb.error = None;
            });
            let _ = deps.registry.advance_status(codebase_id, CodebaseStatus::Completed);
            let _ = journal.record("finalise", &stats.chunks_created);
            tracing::info!(
                "ingestion of {codebase_id} completed: {} chunk(s), {} secret(s)",
                stats.chunks_created,
                stats.secrets_total
            );
        }
        Err(WorkflowError::Cancelled) => {
            tracing::info!("ingestion of {codebase_id} cancelled, releasing staging");
            staging::remove_staging(&staging);
        }
        Err(WorkflowError::Failed(err)) => {
            tracing::error!("ingestion of {codebase_id} failed: {err:#}");
            let _ = deps.registry.update(codebase_id, |cb| {
                cb.error = Some(format!("{err:#}"));
            });
            let _ = deps.registry.advance_status(codebase_id, CodebaseStatus::Failed);
            staging::remove_staging(&staging);
        }
    }
}

fn check_cancel(cancel: &AtomicBool) -> Result<(), WorkflowError> {
    if cancel.load(Ordering::Relaxed) {
        Err(WorkflowError::Cancelled)
    } else {
        Ok(())
    }
}

async fn run_activities(
    deps: &IngestDeps,
    codebase: &Codebase,
    journal: &mut Journal,
    staging: &Path,
    cancel: &Arc<AtomicBool>,
) -> Result<IngestStats, WorkflowError> {
    let codebase_id = codebase.id;
    let source_dir = staging.join(staging::SOURCE_DIR);

    // ── 1. validate ──────────────────────────────────────
    deps.registry.set_step(codebase_id, IngestStep::Validating);
    let mode = match journal.lookup::<MaterialiseMode>("validate") {
        Some(mode) => mode,
        None => {
            let mode = activity_validate(deps, codebase, staging).await?;
            journal.record("validate", &mode).context("journal write")?;
            mode
        }
    };
    check_cancel(cancel)?;

    // ── 2. materialise ───────────────────────────────────
    deps.registry.set_step(codebase_id, IngestStep::Cloning);
    let manifest: Vec<FileEntry> = match journal.lookup("materialise") {
        Some(manifest) => manifest,
        None => {
            let manifest = activity_materialise(deps, codebase, mode, staging, &source_dir).await?;
            journal.record("materialise", &manifest).context("journal write")?;
            manifest
        }
    };

    let (primary_language, languages) = language_profile(&manifest);
    let total_files = manifest.len();
    deps.registry
        .update(codebase_id, |cb| {
            cb.total_files = total_files;
            cb.primary_language = primary_language.clone();
            cb.languages = languages.clone();
        })
        .map_err(|e| WorkflowError::Failed(e.into()))?;
    check_cancel(cancel)?;

    // ── 3. scan + parse ──────────────────────────────────
    deps.registry.set_step(codebase_id, IngestStep::Parsing);
    let scanned = activity_scan_parse(&source_dir, manifest.clone(), cancel.clone()).await?;
    journal
        .record("scan_parse", &scanned.secrets_total)
        .context("journal write")?;
    check_cancel(cancel)?;

    // ── 4. chunk ─────────────────────────────────────────
    deps.registry.set_step(codebase_id, IngestStep::Chunking);
    let chunker_config = ChunkerConfig {
        token_target: deps.config.chunk_token_target,
        token_cap: deps.config.chunk_token_cap,
        overlap_tokens: 75,
    };
    let file_chunks =
        activity_chunk(codebase_id, chunker_config, scanned.files, cancel.clone()).await?;
    let chunks_created: usize = file_chunks.values().map(|c| c.len()).sum();
    journal.record("chunk", &chunks_created).context("journal write")?;
    check_cancel(cancel)?;

    // ── 5. embed ─────────────────────────────────────────
    deps.registry.set_step(codebase_id, IngestStep::Embedding);
    let embedded = activity_embed(deps, &file_chunks, cancel).await?;

    // ── 6. index ─────────────────────────────────────────
    deps.registry.set_step(codebase_id, IngestStep::Indexing);
    activity_index(deps, codebase_id, &manifest, &embedded, cancel)?;
    journal.record("index", &total_files).context("journal write")?;

    Ok(IngestStats {
        chunks_created,
        secrets_total: scanned.secrets_total,
        secret_summary: scanned.secret_summary,
    })
}

// ─── Activities ──────────────────────────────────────────

async fn activity_validate(
    deps: &IngestDeps,
    codebase: &Codebase,
    staging: &Path,
) -> Result<MaterialiseMode, WorkflowError> {
    let max_bytes = deps.config.max_upload_bytes;
    let result = tokio::time::timeout(LIGHT_ACTIVITY_TIMEOUT, async {
        match codebase.source_kind {
            SourceKind::Archive => {
                let archive = staging.join(staging::UPLOAD_NAME);
                staging::validate_archive(&archive, max_bytes)?;
                Ok::<_, anyhow::Error>(MaterialiseMode::Extract)
            }
            SourceKind::RemoteUrl => {
                let url = codebase
                    .source_ref
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("remote codebase has no origin URL"))?;
                staging::validate_remote_url(url)?;
                Ok(MaterialiseMode::Clone)
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("validate timed out"))?;

    result.map_err(WorkflowError::Failed)
}

async fn activity_materialise(
    deps: &IngestDeps,
    codebase: &Codebase,
    mode: MaterialiseMode,
    staging: &Path,
    source_dir: &Path,
) -> Result<Vec<FileEntry>, WorkflowError> {
    let staging = staging.to_path_buf();
    let source_dir = source_dir.to_path_buf();
    let source_ref = codebase.source_ref.clone();
    let retry = deps.config.retry;

    let manifest = with_retry(&retry, "materialise", || {
        let staging = staging.clone();
        let source_dir = source_dir.clone();
        let source_ref = source_ref.clone();
        async move {
            tokio::task::spawn_blocking(move || -> Result<Vec<FileEntry>> {
                if !source_dir.exists() {
                    match mode {
                        MaterialiseMode::Extract => {
                            staging::extract_archive(&staging.join(staging::UPLOAD_NAME), &source_dir)?
                        }
                        MaterialiseMode::Clone => {
                            let url = source_ref
                                .as_deref()
                                .ok_or_else(|| anyhow::anyhow!("remote codebase has no origin URL"))?;
                            staging::clone_remote(url, &source_dir)?;
                        }
                    }
                }
                Ok(staging::build_manifest(&source_dir))
            })
            .await
            .map_err(|e| RetryError::permanent(anyhow::anyhow!("materialise task panicked: {e}")))?
            .map_err(|err| match mode {
                // Network clones are worth retrying; local extraction is not.
                MaterialiseMode::Clone => RetryError::transient(err),
                MaterialiseMode::Extract => RetryError::permanent(err),
            })
        }
    })
    .await
    .map_err(WorkflowError::Failed)?;

    if manifest.is_empty() {
        return Err(WorkflowError::Failed(anyhow::anyhow!(
            "materialised source tree contains no files"
        )));
    }
    Ok(manifest)
}

struct ScannedFile {
    entry: FileEntry,
    redacted: String,
    parsed: Option<ParsedFile>,
}

struct ScanOutput {
    files: Vec<ScannedFile>,
    secrets_total: usize,
    secret_summary: Vec<SecretFileSummary>,
}

/// Read, secret-scrub, and parse every manifest file. Binary and unsupported
/// files are recorded and skipped, never fatal. CPU-bound, so it runs on the
/// blocking pool with cancellation checks between files.
async fn activity_scan_parse(
    source_dir: &Path,
    manifest: Vec<FileEntry>,
    cancel: Arc<AtomicBool>,
) -> Result<ScanOutput, WorkflowError> {
    let source_dir = source_dir.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<ScanOutput, WorkflowError> {
        let scanner = SecretScanner::new();
        let mut files = Vec::new();
        let mut secret_summary = Vec::new();
        let mut secrets_total = 0usize;

        for entry in manifest {
            check_cancel(&cancel)?;

            let Ok(content) = std::fs::read_to_string(source_dir.join(&entry.path)) else {
                tracing::warn!("skipping binary or unreadable file {}", entry.path);
                continue;
            };

            let (redacted, matches) = scanner.scan(&content);
            if !matches.is_empty() {
                secrets_total += matches.len();
                let mut types: Vec<String> = Vec::new();
                for m in &matches {
                    let label = m.kind.label().to_string();
                    if !types.contains(&label) {
                        types.push(label);
                    }
                }
                secret_summary.push(SecretFileSummary {
                    file_path: entry.path.clone(),
                    secret_count: matches.len(),
                    types,
                });
            }

            let parsed = match entry.language.as_deref().and_then(language_from_id) {
                Some(language) => Some(parser::parse_file(&entry.path, &redacted, language)),
                None => {
                    tracing::warn!("unsupported extension, not parsing {}", entry.path);
                    None
                }
            };

            files.push(ScannedFile {
                entry,
                redacted,
                parsed,
            });
        }

        Ok(ScanOutput {
            files,
            secrets_total,
            secret_summary,
        })
    })
    .await
    .map_err(|e| WorkflowError::Failed(anyhow::anyhow!("scan task panicked: {e}")))?
}

/// Chunk parsed files, keyed by file path.
async fn activity_chunk(
    codebase_id: Uuid,
    config: ChunkerConfig,
    files: Vec<ScannedFile>,
    cancel: Arc<AtomicBool>,
) -> Result<HashMap<String, Vec<CodeChunk>>, WorkflowError> {
    tokio::task::spawn_blocking(move || -> Result<HashMap<String, Vec<CodeChunk>>, WorkflowError> {
        let chunker = Chunker::new(config);
        let mut by_file = HashMap::new();

        for file in files {
            check_cancel(&cancel)?;
            let Some(parsed) = file.parsed else {
                continue;
            };
            let chunks = chunker.chunk_file(codebase_id, &parsed, &file.redacted);
            if !chunks.is_empty() {
                by_file.insert(file.entry.path.clone(), chunks);
            }
        }

        Ok(by_file)
    })
    .await
    .map_err(|e| WorkflowError::Failed(anyhow::anyhow!("chunk task panicked: {e}")))?
}

/// Embed all chunks in manifest order, one batch at a time with an
/// inter-batch delay so providers see steady load.
async fn activity_embed(
    deps: &IngestDeps,
    file_chunks: &HashMap<String, Vec<CodeChunk>>,
    cancel: &Arc<AtomicBool>,
) -> Result<HashMap<String, (Vec<CodeChunk>, Vec<Vec<f32>>)>, WorkflowError> {
    let mut ordered: Vec<(&String, &Vec<CodeChunk>)> = file_chunks.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let all_chunks: Vec<&CodeChunk> = ordered.iter().flat_map(|(_, c)| c.iter()).collect();
    let texts: Vec<String> = all_chunks
        .iter()
        // File path prefix gives the embedding context beyond the bare body.
        .map(|c| format!("File: {}\n{}", c.file_path, c.content))
        .collect();

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    let batch_size = deps.config.embedding_batch.max(1);
    let delay = Duration::from_millis(deps.config.embedding_batch_delay_ms);

    for batch in texts.chunks(batch_size) {
        check_cancel(cancel)?;
        // Provider pushback (rate limits, brief outages) backs off under the
        // shared policy; only budget exhaustion fails the workflow.
        let embedder = deps.embedder.clone();
        let batch: Vec<String> = batch.to_vec();
        let embedded = with_retry(&deps.config.retry, "embed_batch", || {
            let embedder = embedder.clone();
            let batch = batch.clone();
            async move {
                embedder
                    .embed_batch(&batch, EmbedTask::Document)
                    .await
                    .map_err(RetryError::transient)
            }
        })
        .await
        .context("embedding batch failed")
        .map_err(WorkflowError::Failed)?;
        vectors.extend(embedded);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    let mut out = HashMap::new();
    let mut cursor = 0usize;
    for (path, chunks) in ordered {
        let slice = vectors[cursor..cursor + chunks.len()].to_vec();
        cursor += chunks.len();
        out.insert(path.clone(), (chunks.clone(), slice));
    }
    Ok(out)
}

/// Upsert per-file chunk groups in manifest order, advancing the processed
/// counter after each file commits. Files without chunks (skipped, binary,
/// chunkless) still count as processed.
fn activity_index(
    deps: &IngestDeps,
    codebase_id: Uuid,
    manifest: &[FileEntry],
    embedded: &HashMap<String, (Vec<CodeChunk>, Vec<Vec<f32>>)>,
    cancel: &Arc<AtomicBool>,
) -> Result<(), WorkflowError> {
    for (index, entry) in manifest.iter().enumerate() {
        check_cancel(cancel)?;
        if let Some((chunks, vectors)) = embedded.get(&entry.path) {
            deps.vectors
                .upsert(chunks, vectors)
                .with_context(|| format!("failed to index chunks of {}", entry.path))
                .map_err(WorkflowError::Failed)?;
        }
        deps.registry.record_progress(codebase_id, index + 1);
    }
    Ok(())
}

// ─── Helpers ─────────────────────────────────────────────

fn language_from_id(id: &str) -> Option<Language> {
    match id {
        "python" => Some(Language::Python),
        "javascript" => Some(Language::JavaScript),
        "typescript" => Some(Language::TypeScript),
        "tsx" => Some(Language::Tsx),
        "java" => Some(Language::Java),
        "go" => Some(Language::Go),
        "rust" => Some(Language::Rust),
        "c" => Some(Language::C),
        "cpp" => Some(Language::Cpp),
        _ => None,
    }
}

/// Detected languages ranked by file count; the most common is primary.
fn language_profile(manifest: &[FileEntry]) -> (Option<String>, Vec<String>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entry in manifest {
        if let Some(language) = entry.language.as_deref() {
            *counts.entry(language).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let primary = ranked.first().map(|(language, _)| language.to_string());
    let all = ranked.into_iter().map(|(language, _)| language.to_string()).collect();
    (primary, all)
}

/// Staging directory for a codebase id under this config.
pub fn staging_dir_for(config: &Config, codebase_id: Uuid) -> PathBuf {
    staging::codebase_staging(&config.staging_dir(), codebase_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, language: Option<&str>) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size: 10,
            language: language.map(String::from),
        }
    }

    #[test]
    fn test_language_profile_ranks_by_count() {
        let manifest = vec![
            entry("a.py", Some("python")),
            entry("b.py", Some("python")),
            entry("c.rs", Some("rust")),
            entry("README.md", None),
        ];
        let (primary, all) = language_profile(&manifest);
        assert_eq!(primary.as_deref(), Some("python"));
        assert_eq!(all, vec!["python", "rust"]);
    }

    #[test]
    fn test_language_profile_empty() {
        let (primary, all) = language_profile(&[entry("README.md", None)]);
        assert!(primary.is_none());
        assert!(all.is_empty());
    }

    #[test]
    fn test_language_profile_deterministic_tie() {
        let manifest = vec![entry("a.py", Some("python")), entry("b.rs", Some("rust"))];
        let (primary, _) = language_profile(&manifest);
        // Alphabetical tie-break.
        assert_eq!(primary.as_deref(), Some("python"));
    }

    #[test]
    fn test_check_cancel() {
        let flag = AtomicBool::new(false);
        assert!(check_cancel(&flag).is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(check_cancel(&flag), Err(WorkflowError::Cancelled)));
    }
}
