//! Point-in-time metric snapshots and their bounded collection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::DiagnosticsError;
use crate::integrations::{CacheProvider, MetricsProvider};

/// 1, 5 and 15 minute load averages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuLoad {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

impl CpuLoad {
    pub fn new(one: f64, five: f64, fifteen: f64) -> Self {
        Self {
            one: one.max(0.0),
            five: five.max(0.0),
            fifteen: fifteen.max(0.0),
        }
    }
}

/// Memory totals in bytes. `used` is always `total - free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

impl MemoryUsage {
    pub fn new(total: u64, free: u64) -> Self {
        let free = free.min(total);
        Self {
            total,
            free,
            used: total - free,
        }
    }

    pub fn free_ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| self.free as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    /// 0-100
    pub percent_used: f64,
}

impl DiskUsage {
    pub fn new(total: u64, used: u64) -> Self {
        let used = used.min(total);
        let percent_used = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total,
            used,
            percent_used,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatteryHealth {
    Normal,
    Poor,
    #[default]
    Unknown,
}

impl From<&str> for BatteryHealth {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "normal" | "good" => Self::Normal,
            "poor" | "replace soon" | "replace now" | "service battery" => Self::Poor,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for BatteryHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Poor => write!(f, "Poor"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Hardware readings. These are heuristic on most platforms and should be
/// treated as best-effort inputs, not measurements.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareHealth {
    pub cpu_temperature_celsius: Option<f64>,
    pub battery_health: BatteryHealth,
    pub battery_cycles: Option<u32>,
    pub storage_health: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheLocation {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A single read of every monitored metric. Absent fields mean the
/// corresponding provider failed or timed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub cpu_load: Option<CpuLoad>,
    pub memory: Option<MemoryUsage>,
    pub disk: Option<DiskUsage>,
    pub running_processes: Vec<ProcessSample>,
    pub hardware: Option<HardwareHealth>,
    pub cache_locations: Vec<CacheLocation>,
}

impl MetricsSnapshot {
    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            taken_at: Utc::now(),
            cpu_load: None,
            memory: None,
            disk: None,
            running_processes: Vec::new(),
            hardware: None,
            cache_locations: Vec::new(),
        }
    }

    pub fn total_cache_bytes(&self) -> u64 {
        self.cache_locations.iter().map(|c| c.size_bytes).sum()
    }

    /// Processes sorted by CPU share, highest first.
    pub fn top_by_cpu(&self, n: usize) -> Vec<&ProcessSample> {
        let mut procs: Vec<_> = self.running_processes.iter().collect();
        procs.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        procs.truncate(n);
        procs
    }

    /// Processes sorted by memory share, highest first.
    pub fn top_by_memory(&self, n: usize) -> Vec<&ProcessSample> {
        let mut procs: Vec<_> = self.running_processes.iter().collect();
        procs.sort_by(|a, b| b.memory_percent.total_cmp(&a.memory_percent));
        procs.truncate(n);
        procs
    }

    /// True when neither CPU nor memory could be read.
    pub fn is_degraded(&self) -> bool {
        self.cpu_load.is_none() && self.memory.is_none()
    }
}

/// Await a capability call under `timeout`, turning failure into `None`.
pub(crate) async fn bounded<T, F>(metric: &'static str, timeout: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, DiagnosticsError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            warn!(metric, error = %err, "metric unavailable, omitting");
            None
        }
        Err(_) => {
            warn!(metric, ?timeout, "metric collection timed out, omitting");
            None
        }
    }
}

/// Drop repeated pids, keeping the first sample seen.
pub(crate) fn dedup_by_pid(processes: Vec<ProcessSample>) -> Vec<ProcessSample> {
    let mut seen = HashSet::new();
    processes
        .into_iter()
        .filter(|p| seen.insert(p.pid))
        .collect()
}

/// Read every sub-metric concurrently. Each call is individually bounded so
/// one hung source never stalls the whole snapshot.
pub async fn collect_snapshot(
    metrics: &dyn MetricsProvider,
    cache: &dyn CacheProvider,
    cache_roots: &[PathBuf],
    timeout: Duration,
) -> MetricsSnapshot {
    let (cpu_load, memory, disk, processes, hardware, cache_locations) = tokio::join!(
        bounded("cpu_load", timeout, metrics.cpu_load()),
        bounded("memory", timeout, metrics.memory()),
        bounded("disk", timeout, metrics.disk()),
        bounded("processes", timeout, metrics.processes()),
        bounded("hardware", timeout, metrics.hardware()),
        bounded("cache_scan", timeout, cache.scan(cache_roots)),
    );

    let snapshot = MetricsSnapshot {
        taken_at: Utc::now(),
        cpu_load,
        memory,
        disk,
        running_processes: dedup_by_pid(processes.unwrap_or_default()),
        hardware,
        cache_locations: cache_locations.unwrap_or_default(),
    };

    debug!(
        processes = snapshot.running_processes.len(),
        cache_locations = snapshot.cache_locations.len(),
        degraded = snapshot.is_degraded(),
        "snapshot collected"
    );

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{MockCacheProvider, MockMetricsProvider};

    fn sample(pid: u32, name: &str, cpu: f64, mem: f64) -> ProcessSample {
        ProcessSample {
            pid,
            name: name.to_string(),
            cpu_percent: cpu,
            memory_percent: mem,
        }
    }

    #[test]
    fn memory_usage_keeps_used_consistent() {
        let mem = MemoryUsage::new(2_000, 2_500);
        assert_eq!(mem.free, 2_000);
        assert_eq!(mem.used, 0);

        let mem = MemoryUsage::new(2_000, 100);
        assert_eq!(mem.used, 1_900);
        assert_eq!(mem.free_ratio(), Some(0.05));
        assert_eq!(MemoryUsage::new(0, 0).free_ratio(), None);
    }

    #[test]
    fn dedup_keeps_first_sample_per_pid() {
        let procs = vec![sample(1, "a", 1.0, 1.0), sample(1, "b", 2.0, 2.0), sample(2, "c", 0.0, 0.0)];
        let deduped = dedup_by_pid(procs);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].name, "a");
    }

    #[test]
    fn battery_condition_strings_map_to_health() {
        assert_eq!(BatteryHealth::from("Normal"), BatteryHealth::Normal);
        assert_eq!(BatteryHealth::from("Replace Soon"), BatteryHealth::Poor);
        assert_eq!(BatteryHealth::from("Poor"), BatteryHealth::Poor);
        assert_eq!(BatteryHealth::from("???"), BatteryHealth::Unknown);
    }

    #[tokio::test]
    async fn failed_sub_metrics_are_omitted_not_fatal() {
        let mut metrics = MockMetricsProvider::new();
        metrics
            .expect_cpu_load()
            .returning(|| Err(DiagnosticsError::unavailable("cpu_load", "boom")));
        metrics
            .expect_memory()
            .returning(|| Ok(MemoryUsage::new(1_000, 500)));
        metrics
            .expect_disk()
            .returning(|| Err(DiagnosticsError::unavailable("disk", "no df")));
        metrics
            .expect_processes()
            .returning(|| Ok(vec![sample(10, "x", 5.0, 5.0), sample(10, "x", 5.0, 5.0)]));
        metrics
            .expect_hardware()
            .returning(|| Ok(HardwareHealth::default()));

        let mut cache = MockCacheProvider::new();
        cache.expect_scan().returning(|_| Ok(Vec::new()));

        let snapshot = collect_snapshot(&metrics, &cache, &[], Duration::from_secs(1)).await;

        assert!(snapshot.cpu_load.is_none());
        assert!(snapshot.disk.is_none());
        assert_eq!(snapshot.memory, Some(MemoryUsage::new(1_000, 500)));
        assert_eq!(snapshot.running_processes.len(), 1);
        assert!(!snapshot.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_metric_is_treated_as_absent() {
        let outcome: Option<u32> = bounded("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        })
        .await;
        assert_eq!(outcome, None);
    }
}
