//! Shared ingest vocabulary: source codes, run statuses, trigger kinds, and
//! the reason codes the run lifecycle reports through `stats.reason`.

use serde::{Deserialize, Serialize};

/// Data source a job ingests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCode {
    Wildberries,
    Internal,
}

impl SourceCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceCode::Wildberries => "wildberries",
            SourceCode::Internal => "internal",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wildberries" => Some(SourceCode::Wildberries),
            "internal" => Some(SourceCode::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an ingest run.
///
/// `queued → running → {success, failed, timeout}`; `queued` may also move
/// directly to `skipped` or `timeout` without ever starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
    Skipped,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
            RunStatus::Skipped => "skipped",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            "timeout" => Some(RunStatus::Timeout),
            "skipped" => Some(RunStatus::Skipped),
            _ => None,
        }
    }

    /// Whether the status can still change.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Manual,
    Scheduled,
    Chained,
}

impl TriggeredBy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TriggeredBy::Manual => "manual",
            TriggeredBy::Scheduled => "scheduled",
            TriggeredBy::Chained => "chained",
        }
    }
}

impl std::fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason codes surfaced via `stats.reason` / `meta.system_action.reason_code`.
pub mod reason {
    pub const NO_CREDENTIALS: &str = "no_credentials";
    pub const LOCK_NOT_ACQUIRED: &str = "lock_not_acquired";
    pub const ACTIVE_RUN_EXISTS: &str = "active_run_exists";
    pub const JOB_NOT_FOUND: &str = "job_not_found";
    pub const INVALID_PARAMS: &str = "invalid_params";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const INCOMPLETE_FAILED_PAGE: &str = "incomplete_run_failed_to_fetch_page";
    pub const INCOMPLETE_LOW_COVERAGE: &str = "incomplete_run_low_coverage";
    pub const MANUAL_STUCK: &str = "manual_stuck";
    pub const STALE_UNLOCK_CONFLICT: &str = "stale_unlock_conflict";
    pub const SWEEPER_STALE: &str = "sweeper_stale";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_round_trips_through_str() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Timeout,
            RunStatus::Skipped,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("cancelled"), None);
    }

    #[test]
    fn only_queued_and_running_are_active() {
        assert!(RunStatus::Queued.is_active());
        assert!(RunStatus::Running.is_active());
        assert!(!RunStatus::Success.is_active());
        assert!(!RunStatus::Failed.is_active());
        assert!(!RunStatus::Timeout.is_active());
        assert!(!RunStatus::Skipped.is_active());
    }

    #[test]
    fn source_code_serializes_snake_case() {
        let json = serde_json::to_string(&SourceCode::Wildberries).expect("serialize");
        assert_eq!(json, "\"wildberries\"");
    }
}
