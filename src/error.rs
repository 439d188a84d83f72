//! Error taxonomy shared by the diagnostics core and its capabilities

use std::path::PathBuf;

/// Errors raised by metric providers and remediation capabilities.
///
/// None of these escape a public core operation: sub-metric failures degrade
/// to an absent metric, and remediation failures are folded into structured
/// results.
#[derive(Debug, thiserror::Error)]
pub enum DiagnosticsError {
    #[error("{metric} provider unavailable: {reason}")]
    ProviderUnavailable { metric: &'static str, reason: String },

    #[error("{metric} collection timed out")]
    Timeout { metric: &'static str },

    #[error("process with PID {pid} no longer exists")]
    ProcessVanished { pid: u32 },

    #[error("failed to terminate process {pid}: {reason}")]
    TerminationFailed { pid: u32, reason: String },

    #[error("refusing to terminate own process (PID {pid})")]
    SelfTermination { pid: u32 },

    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("no fix available for issue: {0}")]
    UnknownIssue(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DiagnosticsError {
    pub fn unavailable(metric: &'static str, reason: impl ToString) -> Self {
        Self::ProviderUnavailable {
            metric,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = DiagnosticsError> = std::result::Result<T, E>;
