//! Run lifecycle events.
//!
//! The orchestrator reports what each run does through an [`EventSink`].
//! Emission never blocks the run and never fails it.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A run began.
    #[serde(rename = "pipeline.started")]
    PipelineStarted,
    /// A stage produced output.
    #[serde(rename = "stage.completed")]
    StageCompleted,
    /// An optional stage failed and was skipped.
    #[serde(rename = "stage.skipped")]
    StageSkipped,
    /// A stage failed.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// A fallback service was tried for a required stage.
    #[serde(rename = "stage.fallback")]
    StageFallback,
    /// Every stage finished.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted,
    /// A required stage could not be recovered.
    #[serde(rename = "pipeline.failed")]
    PipelineFailed,
    /// The deadline passed or the caller cancelled.
    #[serde(rename = "pipeline.timed_out")]
    PipelineTimedOut,
}

impl EventKind {
    /// Dotted event type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline.started",
            Self::StageCompleted => "stage.completed",
            Self::StageSkipped => "stage.skipped",
            Self::StageFailed => "stage.failed",
            Self::StageFallback => "stage.fallback",
            Self::PipelineCompleted => "pipeline.completed",
            Self::PipelineFailed => "pipeline.failed",
            Self::PipelineTimedOut => "pipeline.timed_out",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// What happened.
    pub kind: EventKind,
    /// Run the event belongs to.
    pub run_id: Uuid,
    /// When it was emitted.
    pub timestamp: Timestamp,
    /// Event-specific details.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PipelineEvent {
    /// Creates an event with no data.
    #[must_use]
    pub fn new(kind: EventKind, run_id: Uuid) -> Self {
        Self {
            kind,
            run_id,
            timestamp: now_utc(),
            data: serde_json::Value::Null,
        }
    }

    /// Attaches data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Dotted event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_names_match_serde() {
        for kind in [
            EventKind::PipelineStarted,
            EventKind::StageCompleted,
            EventKind::StageSkipped,
            EventKind::StageFailed,
            EventKind::StageFallback,
            EventKind::PipelineCompleted,
            EventKind::PipelineFailed,
            EventKind::PipelineTimedOut,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }

    #[test]
    fn test_event_with_data() {
        let run_id = Uuid::new_v4();
        let event = PipelineEvent::new(EventKind::StageFailed, run_id)
            .with_data(json!({ "stage": "score", "reason": "timeout" }));

        assert_eq!(event.event_type(), "stage.failed");
        assert_eq!(event.run_id, run_id);
        assert_eq!(event.data["stage"], "score");
    }
}
