//! Success/failure envelopes handed to the CLI and scheduler

use serde::Serialize;

use super::engine::DiagnosticsEngine;
use crate::diagnostics::Issue;
use crate::remediation::{Outcome, RemediationResult, TerminationResult};

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsEnvelope {
    pub success: bool,
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RemediationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseEnvelope {
    pub success: bool,
    pub result: TerminationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Missing metrics only silence their own rules, so a run always succeeds.
pub async fn run_diagnostics(engine: &DiagnosticsEngine) -> DiagnosticsEnvelope {
    DiagnosticsEnvelope {
        success: true,
        issues: engine.run().await,
        error: None,
    }
}

pub async fn fix_issue(engine: &DiagnosticsEngine, issue_id: &str) -> FixEnvelope {
    let result = engine.fix(issue_id).await;
    let error = match result.outcome {
        Outcome::Failed | Outcome::Unsupported => Some(result.message.clone()),
        Outcome::Fixed | Outcome::Suggestion => None,
    };

    FixEnvelope {
        success: result.is_success(),
        result: Some(result),
        error,
    }
}

pub async fn close_process(engine: &DiagnosticsEngine, pid: u32) -> CloseEnvelope {
    let result = engine.terminate(pid).await;
    let error = (!result.is_success()).then(|| result.message.clone());

    CloseEnvelope {
        success: result.is_success(),
        result,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::tests::{busy_engine, SELF_PID};
    use crate::remediation::TerminationStatus;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn diagnostics_envelope_carries_ranked_issues() {
        let envelope = run_diagnostics(&busy_engine()).await;

        assert!(envelope.success);
        assert_eq!(envelope.issues.len(), 2);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["issues"][0]["id"], "high_cpu_usage");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn unknown_issue_is_an_unsupported_failure() {
        let envelope = fix_issue(&busy_engine(), "unknown_id").await;

        assert!(!envelope.success);
        let result = envelope.result.unwrap();
        assert_eq!(result.outcome, Outcome::Unsupported);
        assert_eq!(
            envelope.error.as_deref(),
            Some("no fix available for issue: unknown_id")
        );
    }

    #[tokio::test]
    async fn suggestion_counts_as_success() {
        let envelope = fix_issue(&busy_engine(), "optimizeMemory").await;

        assert!(envelope.success);
        let info = envelope.result.unwrap().process_info.unwrap();
        assert_eq!(info.pid, 77);
    }

    #[tokio::test]
    async fn closing_own_process_is_refused() {
        let envelope = close_process(&busy_engine(), SELF_PID).await;

        assert!(!envelope.success);
        assert_eq!(envelope.result.status, TerminationStatus::Refused);
        assert!(envelope.error.is_some());
    }
}
