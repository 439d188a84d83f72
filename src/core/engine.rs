//! Diagnostics orchestration: collect, evaluate, rank, remediate

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::diagnostics::snapshot::{bounded, collect_snapshot, dedup_by_pid};
use crate::diagnostics::{
    ranker, CacheLocation, Issue, MetricsSnapshot, ProcessSample, Severity, ThresholdPolicy,
    Vulnerability,
};
use crate::events::{Event, EventKind, EventSeverity, EventSink};
use crate::integrations::Capabilities;
use crate::remediation::{
    CleanReport, FixAction, Outcome, RemediationDispatcher, RemediationResult,
    RemediationSettings, TerminationResult, TerminationStatus,
};

/// Stateless between calls. Every operation reads fresh metrics; only
/// `fix`, `terminate` and `clean_cache` touch the host.
pub struct DiagnosticsEngine {
    capabilities: Capabilities,
    policy: ThresholdPolicy,
    dispatcher: RemediationDispatcher,
    events: Option<Arc<dyn EventSink>>,
    scan_timeout: Duration,
}

impl DiagnosticsEngine {
    pub fn new(
        capabilities: Capabilities,
        policy: ThresholdPolicy,
        settings: RemediationSettings,
    ) -> Self {
        let scan_timeout = settings.timeout;
        let dispatcher = RemediationDispatcher::new(
            Arc::clone(&capabilities.metrics),
            Arc::clone(&capabilities.cache),
            Arc::clone(&capabilities.processes),
            settings,
        );

        Self {
            capabilities,
            policy,
            dispatcher,
            events: None,
            scan_timeout,
        }
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// The vulnerability scan shells out to update tools, so it gets its own
    /// bound instead of the per-metric one.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let settings = self.dispatcher.settings();
        collect_snapshot(
            self.capabilities.metrics.as_ref(),
            self.capabilities.cache.as_ref(),
            &settings.cache_roots,
            settings.timeout,
        )
        .await
    }

    /// Running processes, without the rest of the snapshot.
    pub async fn processes(&self) -> Vec<ProcessSample> {
        bounded(
            "processes",
            self.dispatcher.settings().timeout,
            self.capabilities.metrics.processes(),
        )
        .await
        .map(dedup_by_pid)
        .unwrap_or_default()
    }

    /// Sizes of the configured cache roots. Walking large caches is slow, so
    /// this uses the scan bound.
    pub async fn scan_cache(&self) -> Vec<CacheLocation> {
        let roots = &self.dispatcher.settings().cache_roots;
        bounded(
            "cache_scan",
            self.scan_timeout,
            self.capabilities.cache.scan(roots),
        )
        .await
        .unwrap_or_default()
    }

    async fn vulnerabilities(&self) -> Vec<Vulnerability> {
        bounded(
            "vulnerability_scan",
            self.scan_timeout,
            self.capabilities.scanner.scan(),
        )
        .await
        .unwrap_or_default()
    }

    /// Collect a snapshot, evaluate it and return issues most severe first.
    ///
    /// Metrics that fail are left out and only their rules go quiet. A run
    /// missing both CPU and memory is recorded as a warning.
    pub async fn run(&self) -> Vec<Issue> {
        let (snapshot, vulnerabilities) = tokio::join!(self.snapshot(), self.vulnerabilities());
        let degraded = snapshot.is_degraded();
        if degraded {
            warn!("cpu and memory both unavailable, evaluating remaining metrics");
        }

        let issues = ranker::rank(self.policy.evaluate(&snapshot, &vulnerabilities));
        let overall = ranker::overall_severity(&issues);
        info!(issues = issues.len(), ?overall, "diagnostics run complete");

        let mut description = match overall {
            Some(severity) => format!(
                "Diagnostics found {} issue(s), most severe: {severity}",
                issues.len()
            ),
            None => "Diagnostics found no issues".to_string(),
        };
        if degraded {
            description.push_str(" (CPU and memory unavailable)");
        }
        let severity = if degraded || overall == Some(Severity::High) {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };
        self.record(Event::new(EventKind::DiagnosticsRun, severity, description))
            .await;

        issues
    }

    /// Whether `issue_id` is reported by a fresh run.
    pub async fn is_present(&self, issue_id: &str) -> bool {
        self.run().await.iter().any(|i| i.id() == issue_id)
    }

    /// Delegate to the dispatcher. Verification is left to the caller, who
    /// re-runs diagnostics once any confirmation step is done.
    pub async fn fix(&self, issue_id: &str) -> RemediationResult {
        let result = self.dispatcher.fix(issue_id).await;

        let kind = match FixAction::resolve(issue_id) {
            Some(FixAction::CleanCache) => EventKind::CacheCleaned,
            _ => EventKind::IssueFixed,
        };
        match result.outcome {
            Outcome::Fixed => {
                self.record(Event::info(kind, format!("{issue_id}: {}", result.message)))
                    .await
            }
            Outcome::Failed => {
                self.record(Event::new(
                    kind,
                    EventSeverity::Warning,
                    format!("{issue_id} failed: {}", result.message),
                ))
                .await
            }
            Outcome::Suggestion | Outcome::Unsupported => {}
        }

        result
    }

    /// Confirmed second phase of process remediation.
    pub async fn terminate(&self, pid: u32) -> TerminationResult {
        let result = self.dispatcher.terminate(pid).await;

        let severity = match result.status {
            TerminationStatus::Terminated => Some(EventSeverity::Info),
            TerminationStatus::Failed => Some(EventSeverity::Warning),
            TerminationStatus::ProcessVanished | TerminationStatus::Refused => None,
        };
        if let Some(severity) = severity {
            self.record(Event::new(
                EventKind::ProcessTerminated,
                severity,
                result.message.clone(),
            ))
            .await;
        }

        result
    }

    /// Clean one root, or every configured root when `path` is `None`.
    pub async fn clean_cache(&self, path: Option<&Path>) -> CleanReport {
        let roots: Vec<PathBuf> = match path {
            Some(p) => vec![p.to_path_buf()],
            None => self.dispatcher.settings().cache_roots.clone(),
        };

        let report = self.dispatcher.clean_cache(&roots).await;
        let severity = if report.skipped.is_empty() {
            EventSeverity::Info
        } else {
            EventSeverity::Warning
        };
        self.record(Event::new(EventKind::CacheCleaned, severity, report.message()))
            .await;
        report
    }

    pub async fn scan_vulnerabilities(&self) -> Vec<Vulnerability> {
        let found = self.vulnerabilities().await;
        let severity = if found.iter().any(|v| v.severity == Severity::High) {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };
        self.record(Event::new(
            EventKind::VulnerabilityScan,
            severity,
            format!("Vulnerability scan found {} potential issue(s)", found.len()),
        ))
        .await;
        found
    }

    async fn record(&self, event: Event) {
        let Some(sink) = &self.events else {
            return;
        };
        debug!(kind = %event.kind, "recording event");
        if let Err(err) = sink.record(event).await {
            warn!(error = %err, "failed to record event");
        }
    }
}
