//! Filesystem-backed cache scanning and cleaning

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::{CacheProvider, CleanSummary};
use crate::diagnostics::CacheLocation;
use crate::error::{DiagnosticsError, Result};
use crate::remediation::cache::{clean_directory, is_excluded, is_hidden_dir};

/// Cache roots on the local filesystem. Paths in `excluded` (the tool's own
/// logs and event log) are neither counted nor cleaned.
#[derive(Debug, Clone, Default)]
pub struct FsCacheProvider {
    excluded: Vec<PathBuf>,
}

impl FsCacheProvider {
    pub fn new(excluded: Vec<PathBuf>) -> Self {
        Self { excluded }
    }
}

/// Total size of the regular files under `root`, skipping hidden and
/// excluded directories, plus the root's own modification time.
pub fn measure(root: &Path, excluded: &[PathBuf]) -> Option<CacheLocation> {
    let meta = std::fs::metadata(root).ok()?;
    if !meta.is_dir() {
        return None;
    }

    let size_bytes = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_hidden_dir(e) && !is_excluded(e.path(), excluded))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum();

    Some(CacheLocation {
        path: root.to_path_buf(),
        size_bytes,
        last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
    })
}

#[async_trait]
impl CacheProvider for FsCacheProvider {
    async fn scan(&self, paths: &[PathBuf]) -> Result<Vec<CacheLocation>> {
        let paths = paths.to_vec();
        let excluded = self.excluded.clone();
        tokio::task::spawn_blocking(move || {
            paths
                .iter()
                .filter_map(|p| {
                    let found = measure(p, &excluded);
                    if found.is_none() {
                        debug!(path = %p.display(), "cache root not present");
                    }
                    found
                })
                .collect()
        })
        .await
        .map_err(|err| DiagnosticsError::unavailable("cache_scan", err))
    }

    async fn clean(&self, path: &Path) -> Result<CleanSummary> {
        let root = path.to_path_buf();
        let excluded = self.excluded.clone();
        tokio::task::spawn_blocking(move || {
            clean_directory(&root, &excluded).map_err(|err| match err.kind() {
                ErrorKind::PermissionDenied => DiagnosticsError::PermissionDenied { path: root },
                _ => DiagnosticsError::Io(err),
            })
        })
        .await
        .map_err(|err| DiagnosticsError::unavailable("cache_clean", err))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn scan_sums_files_and_skips_missing_roots() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("app-cache");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("a.bin"), vec![0u8; 300]).unwrap();
        fs::write(root.join("nested").join("b.bin"), vec![0u8; 200]).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join(".hidden").join("c.bin"), vec![0u8; 999]).unwrap();

        let found = FsCacheProvider::default()
            .scan(&[root.clone(), dir.path().join("missing")])
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, root);
        assert_eq!(found[0].size_bytes, 500);
        assert!(found[0].last_modified.is_some());
    }

    #[tokio::test]
    async fn clean_removes_files_through_the_provider() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("blob"), vec![0u8; 64]).unwrap();
        fs::write(dir.path().join("state.lock"), b"1").unwrap();

        let summary = FsCacheProvider::default().clean(dir.path()).await.unwrap();

        assert_eq!(summary.bytes_freed, 64);
        assert_eq!(summary.files_protected, 1);
    }

    #[tokio::test]
    async fn own_logs_are_neither_counted_nor_cleaned() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("hostcare").join("logs");
        fs::create_dir_all(&logs).unwrap();
        fs::write(logs.join("hostcare.log"), vec![0u8; 500]).unwrap();
        fs::write(dir.path().join("blob"), vec![0u8; 64]).unwrap();
        let provider = FsCacheProvider::new(vec![logs.clone()]);

        let found = provider.scan(&[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(found[0].size_bytes, 64);

        let summary = provider.clean(dir.path()).await.unwrap();
        assert_eq!(summary.bytes_freed, 64);
        assert!(logs.join("hostcare.log").exists());
    }
}
