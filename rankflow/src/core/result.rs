//! The value returned to callers of `submit`.

use super::{HealthStatus, OutcomeStatus, RunStatus, StageOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One entry of the ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    /// Item id.
    pub item_id: String,
    /// Final score in `[0, 100]`.
    pub score: f64,
    /// 1-based rank.
    pub rank: usize,
    /// Short reasons for the score.
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Per-stage summary exposed in diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    /// Stage id.
    pub stage_id: String,
    /// Service that handled the stage.
    pub service: String,
    /// Final status.
    pub status: OutcomeStatus,
    /// Failure code if the stage did not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Invocations made.
    pub attempts: u32,
    /// Whether a fallback produced the output.
    pub from_fallback: bool,
    /// Elapsed milliseconds.
    pub duration_ms: u64,
}

impl From<&StageOutcome> for StageSummary {
    fn from(outcome: &StageOutcome) -> Self {
        Self {
            stage_id: outcome.stage_id.clone(),
            service: outcome.service.clone(),
            status: outcome.status,
            reason: outcome.reason.as_ref().map(ToString::to_string),
            attempts: outcome.attempts,
            from_fallback: outcome.from_fallback,
            duration_ms: outcome.duration_ms,
        }
    }
}

/// Diagnostic metadata about how a result was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Run id.
    pub run_id: Uuid,
    /// Pipeline that ran.
    pub pipeline: String,
    /// Final run status.
    pub status: RunStatus,
    /// Stages that produced output.
    pub stages_completed: usize,
    /// Stages in the definition.
    pub stages_defined: usize,
    /// Stages whose output came from a fallback.
    pub fallbacks_used: usize,
    /// Total run time in milliseconds.
    pub total_duration_ms: u64,
    /// Per-stage summaries in execution order.
    #[serde(default)]
    pub stages: Vec<StageSummary>,
    /// Health of every service the run touched, at the end of the run.
    #[serde(default)]
    pub service_health: BTreeMap<String, HealthStatus>,
}

/// Ranked, explained answer to a request. Always produced, possibly degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Request this answers.
    pub request_id: Uuid,
    /// Items by descending score.
    pub items: Vec<RankedItem>,
    /// Overall confidence in `[0.3, 1.0]`.
    pub confidence: f64,
    /// Human-readable notes on which stages contributed.
    pub explanations: Vec<String>,
    /// Whether the result came from a degraded path.
    pub degraded: bool,
    /// How the result was produced.
    pub diagnostics: RunDiagnostics,
}

impl ProcessingResult {
    /// Item ids in rank order.
    #[must_use]
    pub fn item_ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.item_id.as_str()).collect()
    }

    /// Returns true if the run finished every stage it could.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.diagnostics.status == RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureReason;
    use crate::utils::now_utc;
    use std::time::Duration;

    #[test]
    fn test_stage_summary_from_outcome() {
        let outcome = StageOutcome::failed(
            "score",
            "scorer",
            FailureReason::Timeout,
            now_utc(),
            Duration::from_millis(120),
        )
        .with_attempts(3);

        let summary = StageSummary::from(&outcome);
        assert_eq!(summary.stage_id, "score");
        assert_eq!(summary.status, OutcomeStatus::Failed);
        assert_eq!(summary.reason.as_deref(), Some("timeout"));
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.duration_ms, 120);
    }

    #[test]
    fn test_result_serializes_without_live_state() {
        let result = ProcessingResult {
            request_id: Uuid::nil(),
            items: vec![RankedItem {
                item_id: "a".into(),
                score: 50.0,
                rank: 1,
                reasons: vec![],
            }],
            confidence: 1.0,
            explanations: vec!["ok".into()],
            degraded: false,
            diagnostics: RunDiagnostics::default(),
        };

        let json = serde_json::to_string(&result).unwrap();
        let back: ProcessingResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.item_ids(), vec!["a"]);
        assert!(!back.is_complete());
    }
}
