//! Staging: archive validation and extraction, remote clones, and the file
//! manifest.
//!
//! Each codebase gets one staging directory named by its id. Uploaded
//! archives land there as `upload.zip`; the extracted tree (or clone) lives
//! under `src/`. The manifest lists every regular file worth considering:
//! ignored directories and oversized files are excluded up front, while
//! binary and unsupported files stay listed and are skipped (with a warning)
//! during parsing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::parser::Language;

/// Files larger than this are not indexed.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// Archive file name inside a codebase's staging directory.
pub const UPLOAD_NAME: &str = "upload.zip";
/// Extracted tree / clone target inside a codebase's staging directory.
pub const SOURCE_DIR: &str = "src";

/// One manifest row: a candidate file with its detected language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the source root.
    pub path: String,
    pub size: u64,
    /// Language id, or `None` for unsupported extensions.
    pub language: Option<String>,
}

/// How the workflow materialises the source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialiseMode {
    Extract,
    Clone,
}

/// Verify an uploaded archive: it exists, is within the size cap, and looks
/// like a ZIP. Returns its size.
pub fn validate_archive(archive: &Path, max_bytes: u64) -> Result<u64> {
    let meta = std::fs::metadata(archive)
        .with_context(|| format!("staged archive missing: {}", archive.display()))?;
    if meta.len() > max_bytes {
        anyhow::bail!("archive is {} bytes, above the {max_bytes} byte cap", meta.len());
    }

    let mut magic = [0u8; 2];
    let mut file = std::fs::File::open(archive)?;
    file.read_exact(&mut magic)
        .context("archive too short to be a ZIP")?;
    if &magic != b"PK" {
        anyhow::bail!("unrecognised archive format (expected ZIP)");
    }
    Ok(meta.len())
}

/// Accept only http(s) clone URLs with a host.
pub fn validate_remote_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| anyhow::anyhow!("malformed origin URL: {url}"))?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || !host.contains('.') {
        anyhow::bail!("malformed origin URL: {url}");
    }
    Ok(())
}

/// Extract a ZIP archive into `dest`, refusing entries that escape it.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)
        .with_context(|| format!("failed to open archive {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file).context("failed to read ZIP archive")?;

    std::fs::create_dir_all(dest)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).context("corrupt ZIP entry")?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("skipping ZIP entry with unsafe path: {}", entry.name());
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

/// Clone a remote repository into `dest`.
pub fn clone_remote(url: &str, dest: &Path) -> Result<()> {
    tracing::info!("cloning {url} into {}", dest.display());
    git2::Repository::clone(url, dest).with_context(|| format!("failed to clone {url}"))?;
    Ok(())
}

/// Walk the materialised tree into a manifest. Hidden and dependency
/// directories are pruned; oversized files are dropped.
pub fn build_manifest(root: &Path) -> Vec<FileEntry> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored_dir(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > MAX_FILE_BYTES {
            tracing::debug!("skipping oversized file {}", entry.path().display());
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let language = Language::from_path(&relative).map(|l| l.id().to_string());
        entries.push(FileEntry {
            path: relative,
            size,
            language,
        });
    }

    entries
}

fn is_ignored_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.')
        || matches!(
            name.as_ref(),
            "node_modules" | "target" | "dist" | "build" | "__pycache__" | "vendor" | "venv" | ".venv"
        )
}

/// Staging paths for one codebase.
pub fn codebase_staging(staging_root: &Path, id: uuid::Uuid) -> PathBuf {
    staging_root.join(id.to_string())
}

/// Best-effort staging cleanup.
pub fn remove_staging(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            tracing::warn!("failed to remove staging {}: {e}", dir.display());
        }
    }
}
