//! Process existence checks and forced termination

use async_trait::async_trait;

use super::ProcessControl;
use crate::error::{DiagnosticsError, Result};

/// Signals host processes directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProcessControl;

#[cfg(unix)]
#[async_trait]
impl ProcessControl for HostProcessControl {
    async fn exists(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // Signal 0 probes without delivering; EPERM still means it is alive
        match kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| DiagnosticsError::TerminationFailed {
            pid,
            reason: "PID out of range".to_string(),
        })?;

        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(DiagnosticsError::ProcessVanished { pid }),
            Err(errno) => Err(DiagnosticsError::TerminationFailed {
                pid,
                reason: errno.desc().to_string(),
            }),
        }
    }
}

#[cfg(not(unix))]
#[async_trait]
impl ProcessControl for HostProcessControl {
    async fn exists(&self, pid: u32) -> bool {
        tokio::task::spawn_blocking(move || {
            let mut sys = sysinfo::System::new();
            sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]));
            sys.process(sysinfo::Pid::from_u32(pid)).is_some()
        })
        .await
        .unwrap_or(false)
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        tokio::task::spawn_blocking(move || {
            let mut sys = sysinfo::System::new();
            let target = sysinfo::Pid::from_u32(pid);
            sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[target]));
            match sys.process(target) {
                None => Err(DiagnosticsError::ProcessVanished { pid }),
                Some(process) if process.kill() => Ok(()),
                Some(_) => Err(DiagnosticsError::TerminationFailed {
                    pid,
                    reason: "kill request was rejected".to_string(),
                }),
            }
        })
        .await
        .map_err(|err| DiagnosticsError::TerminationFailed {
            pid,
            reason: err.to_string(),
        })?
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[tokio::test]
    async fn own_process_exists() {
        assert!(HostProcessControl.exists(std::process::id()).await);
    }

    #[tokio::test]
    async fn kills_a_child_and_then_reports_it_gone() {
        let mut child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        let pid = child.id();

        assert!(HostProcessControl.exists(pid).await);
        HostProcessControl.terminate(pid).await.expect("terminate child");
        child.wait().expect("reap child");

        assert!(!HostProcessControl.exists(pid).await);
        assert!(matches!(
            HostProcessControl.terminate(pid).await,
            Err(DiagnosticsError::ProcessVanished { .. })
        ));
    }
}
