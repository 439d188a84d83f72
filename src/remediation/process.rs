//! Process remediation: pick a candidate, then terminate only on confirmation

use serde::Serialize;
use tracing::{info, warn};

use crate::diagnostics::ProcessSample;
use crate::error::DiagnosticsError;
use crate::integrations::ProcessControl;

/// Identity of a process offered to the user for closing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl From<&ProcessSample> for ProcessInfo {
    fn from(p: &ProcessSample) -> Self {
        Self {
            pid: p.pid,
            name: p.name.clone(),
            cpu_percent: p.cpu_percent,
            memory_percent: p.memory_percent,
        }
    }
}

/// Which share of the host a candidate is ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Share {
    Cpu,
    Memory,
}

impl Share {
    fn of(self, p: &ProcessSample) -> f64 {
        match self {
            Self::Cpu => p.cpu_percent,
            Self::Memory => p.memory_percent,
        }
    }
}

impl std::fmt::Display for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "CPU"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

fn is_essential(name: &str, essential: &[String]) -> bool {
    let name = name.strip_suffix(".exe").unwrap_or(name);
    essential.iter().any(|e| e.eq_ignore_ascii_case(name))
}

/// The heaviest non-essential process above `min_percent`, never our own.
pub fn select_candidate(
    processes: &[ProcessSample],
    share: Share,
    min_percent: f64,
    essential: &[String],
    self_pid: u32,
) -> Option<ProcessInfo> {
    let mut eligible: Vec<&ProcessSample> = processes
        .iter()
        .filter(|p| share.of(p) > min_percent)
        .filter(|p| p.pid != self_pid)
        .filter(|p| !is_essential(&p.name, essential))
        .collect();

    eligible.sort_by(|a, b| share.of(b).total_cmp(&share.of(a)));
    eligible.first().map(|p| ProcessInfo::from(*p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    Terminated,
    /// The process exited between listing and confirmation.
    ProcessVanished,
    /// Termination was not attempted (own pid or invalid pid).
    Refused,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationResult {
    pub pid: u32,
    pub status: TerminationStatus,
    pub message: String,
}

impl TerminationResult {
    pub fn is_success(&self) -> bool {
        self.status == TerminationStatus::Terminated
    }
}

/// Second phase of process remediation. Only ever called after the user
/// confirmed the candidate returned by a suggestion.
pub async fn terminate(control: &dyn ProcessControl, pid: u32, self_pid: u32) -> TerminationResult {
    let (status, message) = match try_terminate(control, pid, self_pid).await {
        Ok(()) => {
            info!(pid, "process terminated");
            (
                TerminationStatus::Terminated,
                format!("Process {pid} terminated successfully"),
            )
        }
        Err(err @ DiagnosticsError::ProcessVanished { .. }) => {
            info!(pid, "process already gone");
            (TerminationStatus::ProcessVanished, err.to_string())
        }
        Err(err @ DiagnosticsError::SelfTermination { .. }) => {
            warn!(pid, "refused to terminate own process");
            (TerminationStatus::Refused, err.to_string())
        }
        Err(err) => {
            warn!(pid, error = %err, "process termination failed");
            (TerminationStatus::Failed, err.to_string())
        }
    };

    TerminationResult {
        pid,
        status,
        message,
    }
}

async fn try_terminate(
    control: &dyn ProcessControl,
    pid: u32,
    self_pid: u32,
) -> Result<(), DiagnosticsError> {
    if pid == self_pid {
        return Err(DiagnosticsError::SelfTermination { pid });
    }
    if pid == 0 {
        return Err(DiagnosticsError::TerminationFailed {
            pid,
            reason: "invalid process ID".to_string(),
        });
    }
    if !control.exists(pid).await {
        return Err(DiagnosticsError::ProcessVanished { pid });
    }
    control.terminate(pid).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::MockProcessControl;
    use pretty_assertions::assert_eq;

    fn sample(pid: u32, name: &str, cpu: f64, mem: f64) -> ProcessSample {
        ProcessSample {
            pid,
            name: name.to_string(),
            cpu_percent: cpu,
            memory_percent: mem,
        }
    }

    fn essentials() -> Vec<String> {
        vec!["Finder".to_string(), "hostcare".to_string(), "explorer".to_string()]
    }

    #[test]
    fn picks_heaviest_non_essential_process() {
        let procs = vec![
            sample(10, "Finder", 90.0, 1.0),
            sample(11, "ffmpeg", 45.0, 2.0),
            sample(12, "cargo", 60.0, 3.0),
            sample(13, "idle", 2.0, 0.1),
        ];

        let picked = select_candidate(&procs, Share::Cpu, 10.0, &essentials(), 1).unwrap();
        assert_eq!(picked.pid, 12);
        assert_eq!(picked.name, "cargo");
    }

    #[test]
    fn never_selects_own_pid() {
        let procs = vec![sample(42, "renamed-binary", 99.0, 50.0), sample(7, "node", 20.0, 6.0)];

        let cpu = select_candidate(&procs, Share::Cpu, 10.0, &essentials(), 42).unwrap();
        assert_eq!(cpu.pid, 7);

        let mem = select_candidate(&procs, Share::Memory, 5.0, &essentials(), 42).unwrap();
        assert_eq!(mem.pid, 7);
    }

    #[test]
    fn essential_match_ignores_case_and_exe_suffix() {
        let procs = vec![sample(3, "EXPLORER.exe", 50.0, 50.0)];
        assert_eq!(select_candidate(&procs, Share::Cpu, 10.0, &essentials(), 1), None);
    }

    #[test]
    fn nothing_above_threshold_yields_none() {
        let procs = vec![sample(3, "vim", 10.0, 5.0)];
        assert_eq!(select_candidate(&procs, Share::Cpu, 10.0, &essentials(), 1), None);
        assert_eq!(select_candidate(&procs, Share::Memory, 5.0, &essentials(), 1), None);
    }

    #[tokio::test]
    async fn refuses_own_pid_without_touching_the_process() {
        let mut control = MockProcessControl::new();
        control.expect_exists().never();
        control.expect_terminate().never();

        let result = terminate(&control, 99, 99).await;
        assert_eq!(result.status, TerminationStatus::Refused);
    }

    #[tokio::test]
    async fn vanished_process_is_reported_distinctly() {
        let mut control = MockProcessControl::new();
        control.expect_exists().returning(|_| false);
        control.expect_terminate().never();

        let result = terminate(&control, 1234, 1).await;
        assert_eq!(result.status, TerminationStatus::ProcessVanished);
        assert_eq!(result.message, "process with PID 1234 no longer exists");
    }

    #[tokio::test]
    async fn exit_during_kill_counts_as_vanished() {
        let mut control = MockProcessControl::new();
        control.expect_exists().returning(|_| true);
        control
            .expect_terminate()
            .returning(|pid| Err(DiagnosticsError::ProcessVanished { pid }));

        let result = terminate(&control, 1234, 1).await;
        assert_eq!(result.status, TerminationStatus::ProcessVanished);
    }

    #[tokio::test]
    async fn termination_failure_is_not_vanished() {
        let mut control = MockProcessControl::new();
        control.expect_exists().returning(|_| true);
        control.expect_terminate().returning(|pid| {
            Err(DiagnosticsError::TerminationFailed {
                pid,
                reason: "operation not permitted".to_string(),
            })
        });

        let result = terminate(&control, 1234, 1).await;
        assert_eq!(result.status, TerminationStatus::Failed);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn live_process_is_terminated() {
        let mut control = MockProcessControl::new();
        control.expect_exists().withf(|pid| *pid == 555).returning(|_| true);
        control.expect_terminate().times(1).returning(|_| Ok(()));

        let result = terminate(&control, 555, 1).await;
        assert!(result.is_success());
        assert_eq!(result.message, "Process 555 terminated successfully");
    }
}
