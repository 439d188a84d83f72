//! Best-effort cache cleaning and large-file discovery

use humansize::{format_size, BINARY};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::integrations::CleanSummary;

/// Extensions never removed by cache cleaning.
pub const PROTECTED_EXTENSIONS: &[&str] = &["lock", "db"];

pub fn is_protected(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| PROTECTED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

pub(crate) fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
}

/// True when `path` is, or lies inside, one of `excluded`.
pub(crate) fn is_excluded(path: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|ex| path.starts_with(ex))
}

/// Remove everything under `root` except protected files, hidden
/// directories and anything under `excluded`. Entries that cannot be
/// removed are recorded and skipped.
///
/// Fails only when `root` itself cannot be listed.
pub fn clean_directory(root: &Path, excluded: &[PathBuf]) -> io::Result<CleanSummary> {
    let mut summary = CleanSummary::default();

    if !root.exists() {
        debug!(path = %root.display(), "cache root does not exist");
        return Ok(summary);
    }

    // Surface an unreadable root to the caller instead of reporting zero work
    fs::read_dir(root)?;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_entry(|e| !is_hidden_dir(e) && !is_excluded(e.path(), excluded));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                debug!(path = %path.display(), error = %err, "skipping unreadable entry");
                summary.entries_skipped.push(path);
                continue;
            }
        };

        let path = entry.path();
        if entry.file_type().is_dir() {
            // Only succeeds once the directory is empty
            if let Err(err) = fs::remove_dir(path) {
                debug!(path = %path.display(), error = %err, "leaving directory in place");
            }
            continue;
        }

        if is_protected(path) {
            summary.files_protected += 1;
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(path) {
            Ok(()) => {
                summary.bytes_freed += size;
                summary.files_removed += 1;
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "could not remove file");
                summary.entries_skipped.push(path.to_path_buf());
            }
        }
    }

    Ok(summary)
}

/// Per-root outcome of a clean across all configured roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanReport {
    pub total_bytes_freed: u64,
    pub cleaned: Vec<CleanedPath>,
    pub skipped: Vec<SkippedPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanedPath {
    pub path: PathBuf,
    pub bytes_freed: u64,
    pub files_removed: usize,
    pub files_protected: usize,
    pub entries_skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPath {
    pub path: PathBuf,
    pub reason: String,
}

impl CleanReport {
    pub fn record_cleaned(&mut self, path: &Path, summary: CleanSummary) {
        self.total_bytes_freed += summary.bytes_freed;
        self.cleaned.push(CleanedPath {
            path: path.to_path_buf(),
            bytes_freed: summary.bytes_freed,
            files_removed: summary.files_removed,
            files_protected: summary.files_protected,
            entries_skipped: summary.entries_skipped.len(),
        });
    }

    pub fn record_skipped(&mut self, path: &Path, reason: impl ToString) {
        self.skipped.push(SkippedPath {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        });
    }

    pub fn message(&self) -> String {
        format!(
            "Cache cleaning completed. Successfully cleaned {} locations, {} skipped. Freed {}.",
            self.cleaned.len(),
            self.skipped.len(),
            format_size(self.total_bytes_freed, BINARY)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Files under `dir` larger than `min_bytes`, biggest first. Nothing is deleted.
pub fn find_large_files(dir: &Path, min_bytes: u64) -> Vec<LargeFile> {
    let mut files: Vec<LargeFile> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let size = e.metadata().ok()?.len();
            (size > min_bytes).then(|| LargeFile {
                path: e.into_path(),
                size_bytes: size,
            })
        })
        .collect();

    files.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
    files
}
