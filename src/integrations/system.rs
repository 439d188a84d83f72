//! sysinfo-backed metrics provider

use async_trait::async_trait;
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};

use super::hardware::HardwareProbe;
use super::MetricsProvider;
use crate::diagnostics::{CpuLoad, DiskUsage, HardwareHealth, MemoryUsage, ProcessSample};
use crate::error::{DiagnosticsError, Result};

/// Keeps one `sysinfo::System` alive so CPU deltas have a baseline between
/// calls. All refreshes run on the blocking pool.
pub struct SystemMonitor {
    sys: Arc<Mutex<System>>,
    hardware: HardwareProbe,
}

impl SystemMonitor {
    pub fn new(hardware: HardwareProbe) -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Self {
            sys: Arc::new(Mutex::new(sys)),
            hardware,
        }
    }

    async fn with_system<T, F>(&self, metric: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut System) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sys = Arc::clone(&self.sys);
        tokio::task::spawn_blocking(move || f(&mut sys.lock()))
            .await
            .map_err(|err| DiagnosticsError::unavailable(metric, err))?
    }
}

fn lossy(name: impl AsRef<OsStr>) -> String {
    name.as_ref().to_string_lossy().into_owned()
}

/// Load averages divided by logical CPU count, so 1.0 means every core busy.
/// Hosts without load averages fall back to instantaneous global usage.
fn normalized_load(sys: &System) -> CpuLoad {
    let cpus = sys.cpus().len().max(1) as f64;
    let load = System::load_average();

    if load.one == 0.0 && load.five == 0.0 && load.fifteen == 0.0 {
        let usage = f64::from(sys.global_cpu_usage()) / 100.0;
        return CpuLoad::new(usage, usage, usage);
    }

    CpuLoad::new(load.one / cpus, load.five / cpus, load.fifteen / cpus)
}

fn root_disk(disks: &Disks) -> Option<DiskUsage> {
    let list = disks.list();
    if list.is_empty() {
        return None;
    }

    if let Some(root) = list.iter().find(|d| d.mount_point() == Path::new("/")) {
        let total = root.total_space();
        return Some(DiskUsage::new(total, total.saturating_sub(root.available_space())));
    }

    let (used, total) = list.iter().fold((0u64, 0u64), |(used, total), disk| {
        let total_space = disk.total_space();
        (
            used + total_space.saturating_sub(disk.available_space()),
            total + total_space,
        )
    });
    Some(DiskUsage::new(total, used))
}

#[async_trait]
impl MetricsProvider for SystemMonitor {
    async fn cpu_load(&self) -> Result<CpuLoad> {
        self.with_system("cpu_load", |sys| {
            sys.refresh_cpu_usage();
            Ok(normalized_load(sys))
        })
        .await
    }

    async fn memory(&self) -> Result<MemoryUsage> {
        self.with_system("memory", |sys| {
            sys.refresh_memory();
            let total = sys.total_memory();
            if total == 0 {
                return Err(DiagnosticsError::unavailable("memory", "total memory reported as zero"));
            }
            Ok(MemoryUsage::new(total, sys.available_memory()))
        })
        .await
    }

    async fn disk(&self) -> Result<DiskUsage> {
        tokio::task::spawn_blocking(|| {
            let disks = Disks::new_with_refreshed_list();
            root_disk(&disks).ok_or_else(|| DiagnosticsError::unavailable("disk", "no disks found"))
        })
        .await
        .map_err(|err| DiagnosticsError::unavailable("disk", err))?
    }

    async fn processes(&self) -> Result<Vec<ProcessSample>> {
        self.with_system("processes", |sys| {
            // Per-process CPU needs two samples
            sys.refresh_all();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            sys.refresh_all();

            let total_memory = sys.total_memory().max(1) as f64;
            let mut samples: Vec<ProcessSample> = sys
                .processes()
                .iter()
                .map(|(pid, process)| ProcessSample {
                    pid: pid.as_u32(),
                    name: lossy(process.name()),
                    cpu_percent: f64::from(process.cpu_usage()),
                    memory_percent: process.memory() as f64 / total_memory * 100.0,
                })
                .collect();

            samples.sort_by_key(|p| p.pid);
            Ok(samples)
        })
        .await
    }

    async fn hardware(&self) -> Result<HardwareHealth> {
        Ok(self.hardware.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn samples_metrics_without_nan() {
        let monitor = SystemMonitor::new(HardwareProbe::new(Duration::from_secs(1)));

        let load = monitor.cpu_load().await.expect("load average");
        assert!(load.one.is_finite() && load.one >= 0.0);

        let memory = monitor.memory().await.expect("memory");
        assert_eq!(memory.used, memory.total - memory.free);
    }

    #[test]
    fn lossy_accepts_str_and_os_str() {
        assert_eq!(lossy("bash"), "bash");
        assert_eq!(lossy(OsStr::new("zsh")), "zsh");
    }
}
