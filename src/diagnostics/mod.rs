//! Diagnostics data model: snapshots in, ranked issues out

pub mod policy;
pub mod ranker;
pub mod snapshot;

use serde::{Deserialize, Serialize};

pub use policy::{ThresholdPolicy, Thresholds};
pub use ranker::rank;
pub use snapshot::{
    BatteryHealth, CacheLocation, CpuLoad, DiskUsage, HardwareHealth, MemoryUsage,
    MetricsSnapshot, ProcessSample,
};

/// Every issue type the policy can raise. The serialized form is the stable
/// issue id shown to users and accepted by `fix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HighCpuUsage,
    LowMemory,
    HighDiskUsage,
    LargeCacheFiles,
    SecurityVulnerabilities,
    HighCpuTemperature,
    PoorBatteryHealth,
}

impl IssueKind {
    pub const ALL: [IssueKind; 7] = [
        Self::HighCpuUsage,
        Self::LowMemory,
        Self::HighDiskUsage,
        Self::LargeCacheFiles,
        Self::SecurityVulnerabilities,
        Self::HighCpuTemperature,
        Self::PoorBatteryHealth,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::HighCpuUsage => "high_cpu_usage",
            Self::LowMemory => "low_memory",
            Self::HighDiskUsage => "high_disk_usage",
            Self::LargeCacheFiles => "large_cache_files",
            Self::SecurityVulnerabilities => "security_vulnerabilities",
            Self::HighCpuTemperature => "high_cpu_temperature",
            Self::PoorBatteryHealth => "poor_battery_health",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub fn category(self) -> Category {
        match self {
            Self::HighCpuUsage | Self::LowMemory => Category::Performance,
            Self::HighDiskUsage | Self::LargeCacheFiles => Category::Storage,
            Self::SecurityVulnerabilities => Category::Security,
            Self::HighCpuTemperature | Self::PoorBatteryHealth => Category::Hardware,
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Performance,
    Storage,
    Security,
    Hardware,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Performance => write!(f, "performance"),
            Self::Storage => write!(f, "storage"),
            Self::Security => write!(f, "security"),
            Self::Hardware => write!(f, "hardware"),
        }
    }
}

/// Issue severity. Ordering for triage is high, then medium, then low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Sort key: lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// A detected condition. Built fresh on every run and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(rename = "id")]
    pub kind: IssueKind,
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    pub details: String,
    pub recommendation: String,
    pub can_fix: bool,
}

impl Issue {
    pub fn id(&self) -> &'static str {
        self.kind.id()
    }
}

/// A finding from the vulnerability scanner. Aggregated into at most one
/// security issue per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub details: String,
}
