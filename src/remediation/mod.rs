//! Remediation dispatch: issue id to fix action to structured result

pub mod cache;
pub mod process;

use humansize::{format_size, BINARY};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::diagnostics::snapshot::{bounded, dedup_by_pid};
use crate::diagnostics::IssueKind;
use crate::error::DiagnosticsError;
use crate::integrations::{CacheProvider, MetricsProvider, ProcessControl};

pub use cache::{CleanReport, LargeFile};
pub use process::{ProcessInfo, Share, TerminationResult, TerminationStatus};

/// Registered fix handlers. An issue is fixable exactly when it maps to one
/// of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixAction {
    OptimizeCpu,
    OptimizeMemory,
    CleanDisk,
    CleanCache,
}

impl FixAction {
    pub const ALL: [FixAction; 4] = [
        Self::OptimizeCpu,
        Self::OptimizeMemory,
        Self::CleanDisk,
        Self::CleanCache,
    ];

    pub fn for_issue(kind: IssueKind) -> Option<Self> {
        match kind {
            IssueKind::HighCpuUsage => Some(Self::OptimizeCpu),
            IssueKind::LowMemory => Some(Self::OptimizeMemory),
            IssueKind::HighDiskUsage => Some(Self::CleanDisk),
            IssueKind::LargeCacheFiles => Some(Self::CleanCache),
            IssueKind::SecurityVulnerabilities
            | IssueKind::HighCpuTemperature
            | IssueKind::PoorBatteryHealth => None,
        }
    }

    /// The issue this action remediates.
    pub fn issue(self) -> IssueKind {
        match self {
            Self::OptimizeCpu => IssueKind::HighCpuUsage,
            Self::OptimizeMemory => IssueKind::LowMemory,
            Self::CleanDisk => IssueKind::HighDiskUsage,
            Self::CleanCache => IssueKind::LargeCacheFiles,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::OptimizeCpu => "optimizeCpu",
            Self::OptimizeMemory => "optimizeMemory",
            Self::CleanDisk => "cleanDisk",
            Self::CleanCache => "cleanCache",
        }
    }

    /// Accepts either an issue id (`high_cpu_usage`) or an action name
    /// (`optimizeCpu`).
    pub fn resolve(request: &str) -> Option<Self> {
        if let Some(kind) = IssueKind::from_id(request) {
            return Self::for_issue(kind);
        }
        Self::ALL.into_iter().find(|a| a.name() == request)
    }
}

impl std::fmt::Display for FixAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Fixed,
    /// Needs explicit confirmation before anything irreversible happens.
    Suggestion,
    Failed,
    Unsupported,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Suggestion => write!(f, "suggestion"),
            Self::Failed => write!(f, "failed"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationDetails {
    CacheClean(CleanReport),
    DiskClean {
        cache: CleanReport,
        large_files: Vec<LargeFile>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationResult {
    pub outcome: Outcome,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_info: Option<ProcessInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<RemediationDetails>,
}

impl RemediationResult {
    fn new(outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            process_info: None,
            details: None,
        }
    }

    fn with_details(mut self, details: RemediationDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Fixed | Outcome::Suggestion)
    }
}

/// Knobs for the fix handlers.
#[derive(Debug, Clone)]
pub struct RemediationSettings {
    pub cpu_process_percent: f64,
    pub memory_process_percent: f64,
    pub essential_processes: Vec<String>,
    pub large_file_bytes: u64,
    pub downloads_dir: Option<PathBuf>,
    pub cache_roots: Vec<PathBuf>,
    pub timeout: Duration,
    pub self_pid: u32,
}

impl Default for RemediationSettings {
    fn default() -> Self {
        Self {
            cpu_process_percent: 10.0,
            memory_process_percent: 5.0,
            essential_processes: Vec::new(),
            large_file_bytes: crate::diagnostics::policy::GIB,
            downloads_dir: None,
            cache_roots: Vec::new(),
            timeout: Duration::from_secs(5),
            self_pid: std::process::id(),
        }
    }
}

/// Directories currently being remediated. A path is held exclusively
/// together with its ancestors and descendants, so `/a` and `/a/b` never
/// run at the same time.
#[derive(Default)]
pub struct ResourceLocks {
    busy: Arc<Mutex<Vec<PathBuf>>>,
    released: Arc<Notify>,
}

impl ResourceLocks {
    pub async fn acquire(&self, path: &Path) -> ResourceGuard {
        let path = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut busy = self.busy.lock();
                if !busy.iter().any(|held| overlaps(held, &path)) {
                    busy.push(path.clone());
                    return ResourceGuard {
                        path,
                        busy: Arc::clone(&self.busy),
                        released: Arc::clone(&self.released),
                    };
                }
            }

            released.await;
        }
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Releases its path on drop and wakes waiting remediations.
pub struct ResourceGuard {
    path: PathBuf,
    busy: Arc<Mutex<Vec<PathBuf>>>,
    released: Arc<Notify>,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.busy.lock().retain(|held| held != &self.path);
        self.released.notify_waiters();
    }
}

pub struct RemediationDispatcher {
    metrics: Arc<dyn MetricsProvider>,
    cache: Arc<dyn CacheProvider>,
    processes: Arc<dyn ProcessControl>,
    settings: RemediationSettings,
    locks: ResourceLocks,
}

impl RemediationDispatcher {
    pub fn new(
        metrics: Arc<dyn MetricsProvider>,
        cache: Arc<dyn CacheProvider>,
        processes: Arc<dyn ProcessControl>,
        settings: RemediationSettings,
    ) -> Self {
        Self {
            metrics,
            cache,
            processes,
            settings,
            locks: ResourceLocks::default(),
        }
    }

    pub fn settings(&self) -> &RemediationSettings {
        &self.settings
    }

    /// Run the fix registered for `request`. Unknown ids come back as
    /// `Unsupported` with no side effects.
    pub async fn fix(&self, request: &str) -> RemediationResult {
        let Some(action) = FixAction::resolve(request) else {
            warn!(request, "no fix registered");
            return RemediationResult::new(
                Outcome::Unsupported,
                DiagnosticsError::UnknownIssue(request.to_string()).to_string(),
            );
        };

        info!(request, %action, "dispatching fix");
        match action {
            FixAction::OptimizeCpu => {
                self.suggest_process(Share::Cpu, self.settings.cpu_process_percent)
                    .await
            }
            FixAction::OptimizeMemory => {
                self.suggest_process(Share::Memory, self.settings.memory_process_percent)
                    .await
            }
            FixAction::CleanDisk => self.clean_disk().await,
            FixAction::CleanCache => {
                let roots = self.settings.cache_roots.clone();
                let report = self.clean_cache(&roots).await;
                cache_result(report)
            }
        }
    }

    /// First phase of process remediation: name a candidate, never kill it.
    async fn suggest_process(&self, share: Share, min_percent: f64) -> RemediationResult {
        let Some(processes) =
            bounded("processes", self.settings.timeout, self.metrics.processes()).await
        else {
            return RemediationResult::new(Outcome::Failed, "Failed to get running applications");
        };
        let processes = dedup_by_pid(processes);

        let candidate = process::select_candidate(
            &processes,
            share,
            min_percent,
            &self.settings.essential_processes,
            self.settings.self_pid,
        );

        match candidate {
            Some(info) => {
                let percent = match share {
                    Share::Cpu => info.cpu_percent,
                    Share::Memory => info.memory_percent,
                };
                let mut result = RemediationResult::new(
                    Outcome::Suggestion,
                    format!(
                        "Identified {} (PID: {}) using {:.1}% {}",
                        info.name, info.pid, percent, share
                    ),
                );
                result.process_info = Some(info);
                result
            }
            None => RemediationResult::new(
                Outcome::Failed,
                format!("No non-essential high {share} processes found to optimize"),
            ),
        }
    }

    /// Clean each root under its resource lock. A root that cannot be
    /// cleaned is recorded as skipped; the rest still run.
    pub async fn clean_cache(&self, roots: &[PathBuf]) -> CleanReport {
        let mut report = CleanReport::default();

        for root in roots {
            let _guard = self.locks.acquire(root).await;
            match self.cache.clean(root).await {
                Ok(summary) => {
                    if !summary.entries_skipped.is_empty() {
                        warn!(
                            path = %root.display(),
                            skipped = summary.entries_skipped.len(),
                            "some cache entries could not be removed"
                        );
                    }
                    report.record_cleaned(root, summary);
                }
                Err(err) => {
                    warn!(path = %root.display(), error = %err, "skipping cache root");
                    report.record_skipped(root, err);
                }
            }
        }

        info!(
            freed = report.total_bytes_freed,
            cleaned = report.cleaned.len(),
            skipped = report.skipped.len(),
            "cache clean finished"
        );
        report
    }

    async fn clean_disk(&self) -> RemediationResult {
        let roots = self.settings.cache_roots.clone();
        let report = self.clean_cache(&roots).await;

        let large_files = match self.settings.downloads_dir.clone() {
            Some(dir) => {
                let min = self.settings.large_file_bytes;
                tokio::task::spawn_blocking(move || cache::find_large_files(&dir, min))
                    .await
                    .unwrap_or_else(|err| {
                        warn!(error = %err, "large file scan aborted");
                        Vec::new()
                    })
            }
            None => Vec::new(),
        };

        let message = format!(
            "Cleaned cache files (freed {}) and identified {} large files that could be removed",
            format_size(report.total_bytes_freed, BINARY),
            large_files.len()
        );

        RemediationResult::new(Outcome::Fixed, message).with_details(RemediationDetails::DiskClean {
            cache: report,
            large_files,
        })
    }

    /// Second phase of process remediation.
    pub async fn terminate(&self, pid: u32) -> TerminationResult {
        process::terminate(self.processes.as_ref(), pid, self.settings.self_pid).await
    }
}

fn cache_result(report: CleanReport) -> RemediationResult {
    let outcome = if report.cleaned.is_empty() && !report.skipped.is_empty() {
        Outcome::Failed
    } else {
        Outcome::Fixed
    };
    RemediationResult::new(outcome, report.message())
        .with_details(RemediationDetails::CacheClean(report))
}
