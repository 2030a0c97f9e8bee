//! Stage outcomes and the failure taxonomy recorded on them.

use super::{OutcomeStatus, StageData};
use crate::utils::{millis, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a stage did not produce output.
///
/// These are values, not errors: they are recorded on a [`StageOutcome`] and
/// never escape the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The call did not finish within its timeout.
    Timeout,
    /// The service returned an error.
    InvocationFailure {
        /// Error message from the service.
        message: String,
    },
    /// The breaker rejected the call before invocation.
    CircuitOpen,
    /// The service answered but its output quality was too low.
    BelowQuality {
        /// Reported quality.
        quality: f64,
        /// Stage threshold.
        threshold: f64,
    },
    /// A required stage and its fallback both failed, or no fallback exists.
    FallbackExhausted {
        /// Description of the primary and fallback failures.
        detail: String,
    },
    /// The run deadline passed before the stage could finish.
    DeadlineExceeded,
    /// The run was cancelled by the caller.
    Cancelled,
}

impl FailureReason {
    /// Short machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::InvocationFailure { .. } => "invocation_failure",
            Self::CircuitOpen => "circuit_open",
            Self::BelowQuality { .. } => "below_quality",
            Self::FallbackExhausted { .. } => "unrecoverable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if the run itself stopped the stage, as opposed to the service failing.
    #[must_use]
    pub fn is_run_abort(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Cancelled)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvocationFailure { message } => write!(f, "invocation_failure: {message}"),
            Self::BelowQuality { quality, threshold } => {
                write!(f, "below_quality: {quality:.2} < {threshold:.2}")
            }
            Self::FallbackExhausted { detail } => write!(f, "unrecoverable: {detail}"),
            other => write!(f, "{}", other.code()),
        }
    }
}

/// Result of executing one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Stage id.
    pub stage_id: String,
    /// Outcome status.
    pub status: OutcomeStatus,
    /// Output, present only when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StageData>,
    /// Failure reason, present when skipped or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Service that handled the stage.
    pub service: String,
    /// Number of invocations made (zero when rejected by the breaker).
    pub attempts: u32,
    /// Whether the output came from the fallback service.
    #[serde(default)]
    pub from_fallback: bool,
    /// Wall-clock start.
    pub started_at: Timestamp,
    /// Wall-clock end.
    pub ended_at: Timestamp,
    /// Elapsed time in milliseconds.
    pub duration_ms: u64,
}

impl StageOutcome {
    /// Creates a completed outcome.
    #[must_use]
    pub fn completed(
        stage_id: impl Into<String>,
        service: impl Into<String>,
        output: StageData,
        started_at: Timestamp,
        elapsed: Duration,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: OutcomeStatus::Completed,
            output: Some(output),
            reason: None,
            service: service.into(),
            attempts: 1,
            from_fallback: false,
            started_at,
            ended_at: now_utc(),
            duration_ms: millis(elapsed),
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(
        stage_id: impl Into<String>,
        service: impl Into<String>,
        reason: FailureReason,
        started_at: Timestamp,
        elapsed: Duration,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: OutcomeStatus::Failed,
            output: None,
            reason: Some(reason),
            service: service.into(),
            attempts: 0,
            from_fallback: false,
            started_at,
            ended_at: now_utc(),
            duration_ms: millis(elapsed),
        }
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Marks the outcome as produced by a fallback service.
    #[must_use]
    pub fn from_fallback(mut self) -> Self {
        self.from_fallback = true;
        self
    }

    /// Turns a failed outcome into a skipped one, keeping its reason.
    #[must_use]
    pub fn into_skipped(mut self) -> Self {
        self.status = OutcomeStatus::Skipped;
        self.output = None;
        self
    }

    /// Returns true if the stage produced output.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the failure code, if any.
    #[must_use]
    pub fn reason_code(&self) -> Option<&'static str> {
        self.reason.as_ref().map(FailureReason::code)
    }
}
