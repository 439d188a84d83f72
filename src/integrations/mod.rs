//! Capabilities the diagnostics core consumes, and their host-backed implementations

pub mod cache;
pub mod hardware;
pub mod processes;
pub mod security;
pub mod system;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::{
    CacheLocation, CpuLoad, DiskUsage, HardwareHealth, MemoryUsage, ProcessSample, Vulnerability,
};
use crate::error::{DiagnosticsError, Result};

/// Point-in-time host readings. Each sub-metric may fail independently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn cpu_load(&self) -> Result<CpuLoad>;
    async fn memory(&self) -> Result<MemoryUsage>;
    async fn disk(&self) -> Result<DiskUsage>;
    async fn processes(&self) -> Result<Vec<ProcessSample>>;
    async fn hardware(&self) -> Result<HardwareHealth>;
}

/// Process existence checks and termination.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn exists(&self, pid: u32) -> bool;
    async fn terminate(&self, pid: u32) -> Result<()>;
}

/// Bytes removed from a single cache root, with what had to be left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanSummary {
    pub bytes_freed: u64,
    pub files_removed: usize,
    pub files_protected: usize,
    pub entries_skipped: Vec<PathBuf>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn scan(&self, paths: &[PathBuf]) -> Result<Vec<CacheLocation>>;
    async fn clean(&self, path: &Path) -> Result<CleanSummary>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VulnerabilityScanner: Send + Sync {
    async fn scan(&self) -> Result<Vec<Vulnerability>>;
}

/// Every capability the engine needs, bundled for construction.
#[derive(Clone)]
pub struct Capabilities {
    pub metrics: Arc<dyn MetricsProvider>,
    pub cache: Arc<dyn CacheProvider>,
    pub processes: Arc<dyn ProcessControl>,
    pub scanner: Arc<dyn VulnerabilityScanner>,
}

impl Capabilities {
    /// Capabilities backed by the running host. Cache cleaning never touches
    /// `own_paths`.
    pub fn host(command_timeout: Duration, own_paths: Vec<PathBuf>) -> Self {
        Self {
            metrics: Arc::new(system::SystemMonitor::new(hardware::HardwareProbe::new(
                command_timeout,
            ))),
            cache: Arc::new(cache::FsCacheProvider::new(own_paths)),
            processes: Arc::new(processes::HostProcessControl),
            scanner: Arc::new(security::HeuristicScanner::new(command_timeout)),
        }
    }
}

/// Run an external command and return its stdout, killing it if it outlives
/// `timeout`.
pub(crate) async fn run_command(
    program: &'static str,
    args: &[&str],
    timeout: Duration,
) -> Result<String> {
    let mut command = tokio::process::Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| DiagnosticsError::Timeout { metric: program })?
        .map_err(|err| DiagnosticsError::unavailable(program, err))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DiagnosticsError::unavailable(program, stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
