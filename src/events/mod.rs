//! Durable record of diagnostic runs, fixes and cleanups

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DiagnosticsRun,
    IssueFixed,
    CacheCleaned,
    ProcessTerminated,
    VulnerabilityScan,
    ReportGenerated,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::DiagnosticsRun,
        Self::IssueFixed,
        Self::CacheCleaned,
        Self::ProcessTerminated,
        Self::VulnerabilityScan,
        Self::ReportGenerated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DiagnosticsRun => "diagnostics_run",
            Self::IssueFixed => "issue_fixed",
            Self::CacheCleaned => "cache_cleaned",
            Self::ProcessTerminated => "process_terminated",
            Self::VulnerabilityScan => "vulnerability_scan",
            Self::ReportGenerated => "report_generated",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown event kind: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub description: String,
    pub severity: EventSeverity,
}

impl Event {
    pub fn new(kind: EventKind, severity: EventSeverity, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            description: description.into(),
            severity,
        }
    }

    pub fn info(kind: EventKind, description: impl Into<String>) -> Self {
        Self::new(kind, EventSeverity::Info, description)
    }
}

/// Where the core records what it did. Recording is fire-and-forget for
/// callers: a failed write is logged and never fails the operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: Event) -> Result<()>;
}

/// Counts of events in a window, by kind and by severity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_events: usize,
    pub events_by_type: IndexMap<EventKind, usize>,
    pub events_by_severity: IndexMap<EventSeverity, usize>,
}

impl Summary {
    pub fn from_events(events: &[Event]) -> Self {
        let mut summary = Self {
            total_events: events.len(),
            ..Self::default()
        };
        for event in events {
            *summary.events_by_type.entry(event.kind).or_default() += 1;
            *summary.events_by_severity.entry(event.severity).or_default() += 1;
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub summary: Summary,
    pub events: Vec<Event>,
}

/// Append-only JSON-lines event log.
pub struct EventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hostcare")
            .join("events.jsonl")
    }

    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening event log {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Every event in the log. Unparseable lines are skipped with a warning.
    pub async fn read_all(&self) -> Result<Vec<Event>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()))
            }
        };

        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str::<Event>(line) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(line = n + 1, error = %err, "skipping malformed event");
                    None
                }
            })
            .collect())
    }

    /// Events in `[since, until]`, oldest first, optionally of one kind.
    pub async fn history(
        &self,
        kind: Option<EventKind>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.timestamp >= since && e.timestamp <= until)
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    pub async fn summary(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Summary> {
        let events = self.history(None, since, until).await?;
        Ok(Summary::from_events(&events))
    }

    /// Summarize the last `days` days and record that a report was made.
    pub async fn generate_report(&self, days: i64) -> Result<Report> {
        let period_end = Utc::now();
        let period_start = period_end - ChronoDuration::days(days);
        let events = self.history(None, period_start, period_end).await?;

        let report = Report {
            generated_at: period_end,
            period_start,
            period_end,
            summary: Summary::from_events(&events),
            events,
        };

        self.append(&Event::info(EventKind::ReportGenerated, "System report generated"))
            .await?;
        debug!(total = report.summary.total_events, "report generated");
        Ok(report)
    }
}

#[async_trait]
impl EventSink for EventLog {
    async fn record(&self, event: Event) -> Result<()> {
        self.append(&event).await
    }
}

/// Keeps events in memory instead of on disk.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    events: parking_lot::Mutex<Vec<Event>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl EventSink for MemorySink {
    async fn record(&self, event: Event) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn at(kind: EventKind, severity: EventSeverity, days_ago: i64) -> Event {
        Event {
            timestamp: Utc::now() - ChronoDuration::days(days_ago),
            ..Event::new(kind, severity, format!("{kind} event"))
        }
    }

    #[tokio::test]
    async fn appends_and_reads_back_in_order() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("nested").join("events.jsonl"));

        log.record(at(EventKind::CacheCleaned, EventSeverity::Info, 2)).await.unwrap();
        log.record(at(EventKind::DiagnosticsRun, EventSeverity::Warning, 1)).await.unwrap();

        let events = log.read_all().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::CacheCleaned);
        assert_eq!(events[1].severity, EventSeverity::Warning);
    }

    #[tokio::test]
    async fn missing_log_reads_as_empty() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let good = serde_json::to_string(&Event::info(EventKind::IssueFixed, "ok")).unwrap();
        std::fs::write(&path, format!("not json\n{good}\n\n")).unwrap();

        let events = EventLog::new(&path).read_all().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "ok");
    }

    #[tokio::test]
    async fn history_filters_by_window_and_kind() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        log.append(&at(EventKind::DiagnosticsRun, EventSeverity::Info, 10)).await.unwrap();
        log.append(&at(EventKind::DiagnosticsRun, EventSeverity::Info, 3)).await.unwrap();
        log.append(&at(EventKind::CacheCleaned, EventSeverity::Info, 1)).await.unwrap();

        let now = Utc::now();
        let week = now - ChronoDuration::days(7);

        assert_eq!(log.history(None, week, now).await.unwrap().len(), 2);
        let runs = log
            .history(Some(EventKind::DiagnosticsRun), week, now)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn report_counts_by_kind_and_severity_then_logs_itself() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        log.append(&at(EventKind::DiagnosticsRun, EventSeverity::Warning, 1)).await.unwrap();
        log.append(&at(EventKind::DiagnosticsRun, EventSeverity::Info, 2)).await.unwrap();
        log.append(&at(EventKind::CacheCleaned, EventSeverity::Info, 3)).await.unwrap();
        log.append(&at(EventKind::CacheCleaned, EventSeverity::Info, 30)).await.unwrap();

        let report = log.generate_report(7).await.unwrap();

        assert_eq!(report.summary.total_events, 3);
        assert_eq!(report.summary.events_by_type[&EventKind::DiagnosticsRun], 2);
        assert_eq!(report.summary.events_by_type[&EventKind::CacheCleaned], 1);
        assert_eq!(report.summary.events_by_severity[&EventSeverity::Info], 2);

        let last = log.read_all().await.unwrap().pop().unwrap();
        assert_eq!(last.kind, EventKind::ReportGenerated);
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempdir().unwrap();
        let log = Arc::new(EventLog::new(dir.path().join("events.jsonl")));

        let writers: Vec<_> = (0..20)
            .map(|i| {
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    log.append(&Event::info(EventKind::IssueFixed, "x".repeat(100 + i)))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        assert_eq!(log.read_all().await.unwrap().len(), 20);
    }

    #[test]
    fn event_kind_parses_from_cli_spelling() {
        assert_eq!(
            "process_terminated".parse::<EventKind>().unwrap(),
            EventKind::ProcessTerminated
        );
        assert!("nope".parse::<EventKind>().is_err());
    }

    #[test]
    fn event_serializes_snake_case() {
        let event = Event::info(EventKind::VulnerabilityScan, "scan");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "vulnerability_scan");
        assert_eq!(json["severity"], "info");
    }
}
