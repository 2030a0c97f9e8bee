//! Turns a finished run into the caller-facing result.

use super::PipelineRun;
use crate::config::AssemblerConfig;
use crate::core::{
    HealthStatus, OutcomeStatus, ProcessingResult, RankedItem, RunDiagnostics, RunStatus,
    ScoredItem, StageSummary,
};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lowest confidence a result ever reports.
pub const CONFIDENCE_FLOOR: f64 = 0.3;

/// Confidence lost per fallback used.
pub const FALLBACK_PENALTY: f64 = 0.1;

/// `(completed / defined) - 0.1 * fallbacks`, clamped to `[0.3, 1.0]`.
#[must_use]
pub fn confidence(completed: usize, defined: usize, fallbacks_used: usize) -> f64 {
    if defined == 0 || completed == 0 {
        return CONFIDENCE_FLOOR;
    }
    let ratio = completed as f64 / defined as f64;
    (ratio - FALLBACK_PENALTY * fallbacks_used as f64).clamp(CONFIDENCE_FLOOR, 1.0)
}

/// Builds [`ProcessingResult`]s.
#[derive(Debug, Clone, Default)]
pub struct ResultAssembler {
    config: AssemblerConfig,
}

impl ResultAssembler {
    /// Creates an assembler.
    #[must_use]
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Assembles the result of a finished run.
    ///
    /// Items come from the last completed stage, sorted by descending score
    /// with ties kept in input order.
    pub fn assemble(
        &self,
        run: &PipelineRun,
        service_health: BTreeMap<String, HealthStatus>,
    ) -> ProcessingResult {
        let definition = run.definition();
        let stages_defined = definition.len();
        let stages_completed = run.stages_completed();
        let fallbacks_used = run.metrics().fallbacks_used;

        let items = run
            .last_output()
            .map(|output| self.rank(&output.items))
            .unwrap_or_default();

        let degraded = run.status() != RunStatus::Completed || stages_completed < stages_defined;

        ProcessingResult {
            request_id: run.request().id,
            items,
            confidence: confidence(stages_completed, stages_defined, fallbacks_used),
            explanations: explain(run),
            degraded,
            diagnostics: RunDiagnostics {
                run_id: run.id(),
                pipeline: definition.name().to_string(),
                status: run.status(),
                stages_completed,
                stages_defined,
                fallbacks_used,
                total_duration_ms: run.metrics().total_duration_ms,
                stages: run.outcomes().iter().map(StageSummary::from).collect(),
                service_health,
            },
        }
    }

    /// Result for a request naming a pipeline that is not registered.
    pub fn unknown_pipeline(&self, request_id: Uuid, pipeline: &str) -> ProcessingResult {
        ProcessingResult {
            request_id,
            items: Vec::new(),
            confidence: CONFIDENCE_FLOOR,
            explanations: vec![format!(
                "Degraded operation: unknown pipeline '{pipeline}'; no stages ran"
            )],
            degraded: true,
            diagnostics: RunDiagnostics {
                run_id: Uuid::new_v4(),
                pipeline: pipeline.to_string(),
                status: RunStatus::Failed,
                ..RunDiagnostics::default()
            },
        }
    }

    fn rank(&self, items: &[ScoredItem]) -> Vec<RankedItem> {
        let mut sorted: Vec<&ScoredItem> = items.iter().collect();
        // `sort_by` is stable; equal scores keep input order.
        sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
        if let Some(max) = self.config.max_results {
            sorted.truncate(max);
        }
        sorted
            .into_iter()
            .enumerate()
            .map(|(index, item)| RankedItem {
                item_id: item.id().to_string(),
                score: item.score,
                rank: index + 1,
                reasons: item.reasons.clone(),
            })
            .collect()
    }
}

fn explain(run: &PipelineRun) -> Vec<String> {
    let mut explanations = Vec::new();

    for outcome in run.outcomes() {
        let reason = outcome
            .reason
            .as_ref()
            .map_or_else(String::new, ToString::to_string);
        explanations.push(match outcome.status {
            OutcomeStatus::Completed if outcome.from_fallback => format!(
                "{} recovered via fallback service {}",
                outcome.stage_id, outcome.service
            ),
            OutcomeStatus::Completed => {
                format!("{} contributed via {}", outcome.stage_id, outcome.service)
            }
            OutcomeStatus::Skipped => format!("{} skipped ({reason})", outcome.stage_id),
            OutcomeStatus::Failed => format!("{} failed ({reason})", outcome.stage_id),
        });
    }

    let completed = run.stages_completed();
    let defined = run.definition().len();
    let source = run
        .outcomes()
        .iter()
        .rev()
        .find(|o| o.is_completed())
        .map(|o| o.stage_id.as_str());

    match (run.status(), source) {
        (_, None) => explanations.push(
            "Degraded operation: no stage completed; returning an empty result".to_string(),
        ),
        (RunStatus::Failed, Some(source)) => explanations.push(format!(
            "Degraded operation: a required stage could not be recovered; showing output of {source}"
        )),
        (RunStatus::TimedOut, Some(source)) => explanations.push(format!(
            "Partial result: run stopped after {completed} of {defined} stages; showing output of {source}"
        )),
        _ => {}
    }

    explanations
}
