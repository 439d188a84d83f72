//! Threshold policy: maps a snapshot to candidate issues

use humansize::{format_size, BINARY};
use serde::{Deserialize, Serialize};

use super::snapshot::{BatteryHealth, MetricsSnapshot, ProcessSample};
use super::{Issue, IssueKind, Severity, Vulnerability};
use crate::remediation::FixAction;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Tunable trigger points. Rules fire strictly above (or, for free memory,
/// strictly below) these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// 1-minute load, normalized per logical CPU.
    pub cpu_load_high: f64,
    /// Fraction of memory that must remain free.
    pub memory_free_low: f64,
    /// Disk percent used, 0-100.
    pub disk_used_high: f64,
    pub cache_total_bytes: u64,
    pub cpu_temperature_high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_load_high: 0.8,
            memory_free_low: 0.10,
            disk_used_high: 90.0,
            cache_total_bytes: GIB,
            cpu_temperature_high: 80.0,
        }
    }
}

/// Pure, deterministic rule set. Each rule is evaluated independently.
#[derive(Debug, Clone, Default)]
pub struct ThresholdPolicy {
    thresholds: Thresholds,
}

impl ThresholdPolicy {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(
        &self,
        snapshot: &MetricsSnapshot,
        vulnerabilities: &[Vulnerability],
    ) -> Vec<Issue> {
        [
            self.check_cpu(snapshot),
            self.check_memory(snapshot),
            self.check_disk(snapshot),
            self.check_cache(snapshot),
            check_security(vulnerabilities),
            self.check_temperature(snapshot),
            check_battery(snapshot),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn check_cpu(&self, snapshot: &MetricsSnapshot) -> Option<Issue> {
        let load = snapshot.cpu_load?.one;
        if load <= self.thresholds.cpu_load_high {
            return None;
        }

        let top = snapshot.top_by_cpu(3);
        Some(issue(
            IssueKind::HighCpuUsage,
            Severity::High,
            format!("High CPU usage detected ({:.1}%)", load * 100.0),
            format!("Top processes: {}", join_processes(&top, |p| p.cpu_percent)),
            "Consider closing unnecessary applications or investigate potential CPU-intensive processes",
        ))
    }

    fn check_memory(&self, snapshot: &MetricsSnapshot) -> Option<Issue> {
        let free = snapshot.memory?.free_ratio()?;
        if free >= self.thresholds.memory_free_low {
            return None;
        }

        let top = snapshot.top_by_memory(3);
        Some(issue(
            IssueKind::LowMemory,
            Severity::High,
            format!("Low available memory ({:.1}% free)", free * 100.0),
            format!(
                "Top memory consumers: {}",
                join_processes(&top, |p| p.memory_percent)
            ),
            "Close unnecessary applications or consider adding more RAM",
        ))
    }

    fn check_disk(&self, snapshot: &MetricsSnapshot) -> Option<Issue> {
        let disk = snapshot.disk?;
        if disk.percent_used <= self.thresholds.disk_used_high {
            return None;
        }

        Some(issue(
            IssueKind::HighDiskUsage,
            Severity::Medium,
            format!("High disk usage ({:.0}% used)", disk.percent_used),
            format!(
                "Available: {}, Total: {}",
                format_size(disk.total.saturating_sub(disk.used), BINARY),
                format_size(disk.total, BINARY)
            ),
            "Clean temporary files, remove unused applications, or consider upgrading storage",
        ))
    }

    fn check_cache(&self, snapshot: &MetricsSnapshot) -> Option<Issue> {
        let total = snapshot.total_cache_bytes();
        if total <= self.thresholds.cache_total_bytes {
            return None;
        }

        Some(issue(
            IssueKind::LargeCacheFiles,
            Severity::Low,
            format!("Large cache files detected ({})", format_size(total, BINARY)),
            format!("{} cache locations found", snapshot.cache_locations.len()),
            "Clean cache files to free up disk space",
        ))
    }

    fn check_temperature(&self, snapshot: &MetricsSnapshot) -> Option<Issue> {
        let temp = snapshot.hardware.as_ref()?.cpu_temperature_celsius?;
        if temp <= self.thresholds.cpu_temperature_high {
            return None;
        }

        Some(issue(
            IssueKind::HighCpuTemperature,
            Severity::High,
            format!("High CPU temperature ({temp:.0}°C)"),
            "CPU is running at a temperature that may cause thermal throttling or damage".to_string(),
            "Check cooling system, clean dust, or reduce CPU load",
        ))
    }
}

fn check_security(vulnerabilities: &[Vulnerability]) -> Option<Issue> {
    if vulnerabilities.is_empty() {
        return None;
    }

    let high: Vec<_> = vulnerabilities
        .iter()
        .filter(|v| v.severity == Severity::High)
        .collect();

    let found = if high.is_empty() {
        issue(
            IssueKind::SecurityVulnerabilities,
            Severity::Medium,
            format!("{} security vulnerabilities detected", vulnerabilities.len()),
            join_details(vulnerabilities.iter()),
            "Review and address security vulnerabilities",
        )
    } else {
        issue(
            IssueKind::SecurityVulnerabilities,
            Severity::High,
            format!(
                "{} high-severity security vulnerabilities detected",
                high.len()
            ),
            join_details(high.into_iter()),
            "Address security vulnerabilities immediately",
        )
    };
    Some(found)
}

fn check_battery(snapshot: &MetricsSnapshot) -> Option<Issue> {
    let hardware = snapshot.hardware.as_ref()?;
    if hardware.battery_health != BatteryHealth::Poor {
        return None;
    }

    let cycles = hardware
        .battery_cycles
        .map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    Some(issue(
        IssueKind::PoorBatteryHealth,
        Severity::Medium,
        "Battery health is poor".to_string(),
        format!("Battery cycles: {cycles}"),
        "Consider replacing the battery",
    ))
}

fn issue(
    kind: IssueKind,
    severity: Severity,
    description: String,
    details: String,
    recommendation: &str,
) -> Issue {
    Issue {
        kind,
        category: kind.category(),
        severity,
        description,
        details,
        recommendation: recommendation.to_string(),
        can_fix: FixAction::for_issue(kind).is_some(),
    }
}

fn join_processes(procs: &[&ProcessSample], share: impl Fn(&ProcessSample) -> f64) -> String {
    procs
        .iter()
        .map(|p| format!("{} ({:.1}%)", p.name, share(p)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_details<'a>(vulns: impl Iterator<Item = &'a Vulnerability>) -> String {
    vulns.map(|v| v.details.as_str()).collect::<Vec<_>>().join(", ")
}
