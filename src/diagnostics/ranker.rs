//! Issue ranking for triage

use super::Issue;

/// Order issues high, medium, low. Issues of equal severity keep their
/// evaluation order.
pub fn rank(mut issues: Vec<Issue>) -> Vec<Issue> {
    // sort_by_key is stable
    issues.sort_by_key(|issue| issue.severity.rank());
    issues
}

/// The most severe level present, if any.
pub fn overall_severity(issues: &[Issue]) -> Option<super::Severity> {
    issues.iter().map(|i| i.severity).min_by_key(|s| s.rank())
}
