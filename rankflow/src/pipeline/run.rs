//! Mutable state of one pipeline execution.

use super::{PipelineDefinition, StageDefinition};
use crate::cancellation::CancellationToken;
use crate::core::{FailureReason, OutcomeStatus, PipelineRequest, RunStatus, StageData, StageOutcome};
use crate::errors::InvalidTransition;
use crate::utils::millis;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Timing and fallback counters of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetrics {
    /// Milliseconds spent per stage id.
    pub stage_durations_ms: BTreeMap<String, u64>,
    /// Stages whose output came from a fallback service.
    pub fallbacks_used: usize,
    /// Milliseconds from start to finish; zero until finished.
    pub total_duration_ms: u64,
}

/// One execution of a pipeline for one request.
///
/// Owned by the task running it; nothing here is shared between runs.
#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    request: Arc<PipelineRequest>,
    definition: Arc<PipelineDefinition>,
    cursor: usize,
    status: RunStatus,
    outcomes: Vec<StageOutcome>,
    carried: Option<Arc<StageData>>,
    metrics: RunMetrics,
    deadline: Instant,
    started: Option<Instant>,
    cancellation: Arc<CancellationToken>,
}

impl PipelineRun {
    /// Creates a queued run. The request deadline is pinned to the monotonic
    /// clock here, once.
    #[must_use]
    pub fn new(
        request: Arc<PipelineRequest>,
        definition: Arc<PipelineDefinition>,
        cancellation: Arc<CancellationToken>,
    ) -> Self {
        let deadline = Instant::now() + request.remaining_budget();
        Self {
            id: Uuid::new_v4(),
            request,
            definition,
            cursor: 0,
            status: RunStatus::Queued,
            outcomes: Vec::new(),
            carried: None,
            metrics: RunMetrics::default(),
            deadline,
            started: None,
            cancellation,
        }
    }

    /// Run id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The request being served.
    #[must_use]
    pub fn request(&self) -> &Arc<PipelineRequest> {
        &self.request
    }

    /// The pipeline being executed.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Monotonic deadline.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Cancellation token of this run.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancellation
    }

    /// Why the run must stop now, if it must.
    #[must_use]
    pub fn abort_reason(&self) -> Option<FailureReason> {
        if self.cancellation.is_cancelled() {
            Some(FailureReason::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(FailureReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// The stage under the cursor, if any remain.
    #[must_use]
    pub fn current_stage(&self) -> Option<&StageDefinition> {
        if self.status.is_terminal() {
            return None;
        }
        self.definition.stages().get(self.cursor)
    }

    /// Output of the last completed stage, or an empty set before any.
    #[must_use]
    pub fn carried(&self) -> Arc<StageData> {
        self.carried.clone().unwrap_or_default()
    }

    /// Output of the last completed stage.
    #[must_use]
    pub fn last_output(&self) -> Option<&StageData> {
        self.carried.as_deref()
    }

    /// Outcomes in execution order.
    #[must_use]
    pub fn outcomes(&self) -> &[StageOutcome] {
        &self.outcomes
    }

    /// Outcome of one stage.
    #[must_use]
    pub fn outcome(&self, stage_id: &str) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage_id == stage_id)
    }

    /// Number of stages that produced output.
    #[must_use]
    pub fn stages_completed(&self) -> usize {
        self.count(OutcomeStatus::Completed)
    }

    /// Number of optional stages skipped.
    #[must_use]
    pub fn stages_skipped(&self) -> usize {
        self.count(OutcomeStatus::Skipped)
    }

    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Counters collected so far.
    #[must_use]
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Moves `queued -> running`.
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Running)?;
        self.started = Some(Instant::now());
        Ok(())
    }

    /// Moves `running` to a terminal status and freezes the total duration.
    pub fn finish(&mut self, status: RunStatus) -> Result<(), InvalidTransition> {
        self.transition(status)?;
        if let Some(started) = self.started {
            self.metrics.total_duration_ms = millis(started.elapsed());
        }
        Ok(())
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records the outcome of the stage under the cursor and advances.
    ///
    /// Completed output becomes the carried result; anything else leaves it
    /// unchanged.
    pub fn record(&mut self, mut outcome: StageOutcome) {
        self.metrics
            .stage_durations_ms
            .insert(outcome.stage_id.clone(), outcome.duration_ms);
        if outcome.is_completed() {
            if outcome.from_fallback {
                self.metrics.fallbacks_used += 1;
            }
            self.carried = outcome.output.take().map(Arc::new);
        }
        self.outcomes.push(outcome);
        self.cursor += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CandidateItem, ScoredItem};
    use crate::pipeline::PipelineDefinitionBuilder;
    use crate::utils::now_utc;

    fn run_with_budget(budget: Duration) -> PipelineRun {
        let definition = PipelineDefinitionBuilder::new("p")
            .stage(StageDefinition::new("a", "svc-a"))
            .unwrap()
            .stage(StageDefinition::new("b", "svc-b").optional())
            .unwrap()
            .build()
            .unwrap();
        PipelineRun::new(
            Arc::new(PipelineRequest::with_budget("tester", budget)),
            Arc::new(definition),
            Arc::new(CancellationToken::new()),
        )
    }

    fn data(id: &str) -> StageData {
        StageData::from_items(vec![ScoredItem::unscored(CandidateItem::new(id))])
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        let mut run = run_with_budget(Duration::from_secs(5));
        assert_eq!(run.status(), RunStatus::Queued);
        assert!(run.finish(RunStatus::Completed).is_err());

        run.start().unwrap();
        run.finish(RunStatus::Completed).unwrap();

        let err = run.start().unwrap_err();
        assert_eq!(err.from, RunStatus::Completed);
        assert_eq!(err.to, RunStatus::Running);
        assert!(run.finish(RunStatus::Failed).is_err());
        assert!(run.current_stage().is_none());
    }

    #[test]
    fn test_record_advances_and_carries() {
        let mut run = run_with_budget(Duration::from_secs(5));
        run.start().unwrap();
        assert!(run.carried().is_empty());
        assert_eq!(run.current_stage().unwrap().id, "a");

        run.record(StageOutcome::completed("a", "svc-a", data("x"), now_utc(), Duration::from_millis(3)));
        assert_eq!(run.carried().items[0].id(), "x");
        assert_eq!(run.current_stage().unwrap().id, "b");

        run.record(
            StageOutcome::failed("b", "svc-b", FailureReason::Timeout, now_utc(), Duration::ZERO)
                .into_skipped(),
        );
        assert_eq!(run.carried().items[0].id(), "x");
        assert!(run.current_stage().is_none());
        assert_eq!(run.stages_completed(), 1);
        assert_eq!(run.stages_skipped(), 1);
        assert_eq!(run.metrics().stage_durations_ms.get("a"), Some(&3));
    }

    #[test]
    fn test_fallback_counted() {
        let mut run = run_with_budget(Duration::from_secs(5));
        run.start().unwrap();
        run.record(
            StageOutcome::completed("a", "backup", data("y"), now_utc(), Duration::ZERO).from_fallback(),
        );
        assert_eq!(run.metrics().fallbacks_used, 1);
        assert!(run.outcome("a").unwrap().from_fallback);
    }

    #[test]
    fn test_abort_reasons() {
        let run = run_with_budget(Duration::from_secs(5));
        assert!(run.abort_reason().is_none());
        run.cancellation().cancel("caller gone");
        assert_eq!(run.abort_reason(), Some(FailureReason::Cancelled));

        let expired = run_with_budget(Duration::ZERO);
        assert_eq!(expired.abort_reason(), Some(FailureReason::DeadlineExceeded));
    }
}
