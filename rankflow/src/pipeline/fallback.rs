//! Recovery for failed required stages.

use super::{PipelineRun, StageDefinition, StageExecutor};
use crate::core::{FailureReason, StageData, StageOutcome};
use std::sync::Arc;
use tracing::{info, warn};

/// Tries a required stage's fallback service once.
#[derive(Debug, Clone)]
pub struct FallbackResolver {
    executor: StageExecutor,
}

impl FallbackResolver {
    /// Creates a resolver delegating to `executor`.
    #[must_use]
    pub fn new(executor: StageExecutor) -> Self {
        Self { executor }
    }

    /// Resolves the failed `primary` outcome of `stage`.
    ///
    /// With a fallback configured, runs it through the executor with zero
    /// retries and marks a successful outcome as coming from the fallback.
    /// Otherwise, or if the fallback fails too, the outcome is
    /// [`FailureReason::FallbackExhausted`]. A run abort during the fallback
    /// is passed through unchanged.
    pub async fn resolve(
        &self,
        stage: &StageDefinition,
        run: &PipelineRun,
        carried: Arc<StageData>,
        primary: &StageOutcome,
    ) -> StageOutcome {
        let primary_reason = primary
            .reason
            .as_ref()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);

        let Some(fallback) = stage.fallback_definition() else {
            warn!(stage_id = %stage.id, service = %stage.target_service, "Required stage failed with no fallback");
            return exhausted(
                primary.clone(),
                format!("{} failed ({primary_reason}); no fallback configured", stage.target_service),
            );
        };

        info!(
            stage_id = %stage.id,
            service = %stage.target_service,
            fallback = %fallback.target_service,
            "Trying fallback service"
        );
        let outcome = self.executor.execute(&fallback, run, carried).await;

        if outcome.is_completed() {
            return outcome.from_fallback();
        }
        if outcome.reason.as_ref().is_some_and(FailureReason::is_run_abort) {
            return outcome;
        }

        let fallback_reason = outcome
            .reason
            .as_ref()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        warn!(
            stage_id = %stage.id,
            fallback = %fallback.target_service,
            reason = %fallback_reason,
            "Fallback service failed"
        );
        let attempts = primary.attempts + outcome.attempts;
        let duration_ms = primary.duration_ms + outcome.duration_ms;
        let mut failed = exhausted(
            outcome,
            format!(
                "{} failed ({primary_reason}); fallback {} failed ({fallback_reason})",
                stage.target_service, fallback.target_service
            ),
        );
        failed.attempts = attempts;
        failed.started_at = primary.started_at;
        failed.duration_ms = duration_ms;
        failed
    }
}

fn exhausted(mut outcome: StageOutcome, detail: String) -> StageOutcome {
    outcome.reason = Some(FailureReason::FallbackExhausted { detail });
    outcome.output = None;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerRegistry;
    use crate::cancellation::CancellationToken;
    use crate::config::{BreakerConfig, HealthConfig};
    use crate::core::PipelineRequest;
    use crate::health::HealthRegistry;
    use crate::pipeline::PipelineDefinitionBuilder;
    use crate::services::ServiceRegistry;
    use crate::testing::{FailingService, StaticService};
    use std::time::Duration;

    fn setup(services: ServiceRegistry, stage: &StageDefinition) -> (FallbackResolver, StageExecutor, PipelineRun) {
        let executor = StageExecutor::new(
            Arc::new(services),
            Arc::new(HealthRegistry::new(HealthConfig::default())),
            Arc::new(CircuitBreakerRegistry::new(BreakerConfig::default())),
        );
        let definition = PipelineDefinitionBuilder::new("p")
            .stage(stage.clone())
            .unwrap()
            .build()
            .unwrap();
        let mut run = PipelineRun::new(
            Arc::new(PipelineRequest::with_budget("tester", Duration::from_secs(5))),
            Arc::new(definition),
            Arc::new(CancellationToken::new()),
        );
        run.start().unwrap();
        (FallbackResolver::new(executor.clone()), executor, run)
    }

    #[tokio::test]
    async fn test_fallback_success_is_marked() {
        let stage = StageDefinition::new("score", "primary")
            .with_max_retries(2)
            .with_fallback("backup");
        let backup = Arc::new(StaticService::with_ids("backup", &["x"]));
        let (resolver, executor, run) = setup(
            ServiceRegistry::new()
                .with(Arc::new(FailingService::new("primary")))
                .with(backup.clone()),
            &stage,
        );

        let primary = executor.execute(&stage, &run, run.carried()).await;
        let outcome = resolver.resolve(&stage, &run, run.carried(), &primary).await;

        assert!(outcome.is_completed());
        assert!(outcome.from_fallback);
        assert_eq!(outcome.service, "backup");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(backup.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_fallback_is_unrecoverable() {
        let stage = StageDefinition::new("score", "primary");
        let (resolver, executor, run) =
            setup(ServiceRegistry::new().with(Arc::new(FailingService::new("primary"))), &stage);

        let primary = executor.execute(&stage, &run, run.carried()).await;
        let outcome = resolver.resolve(&stage, &run, run.carried(), &primary).await;

        assert!(!outcome.is_completed());
        assert_eq!(outcome.reason_code(), Some("unrecoverable"));
        assert!(outcome.reason.unwrap().to_string().contains("no fallback configured"));
    }

    #[tokio::test]
    async fn test_failed_fallback_is_unrecoverable_and_not_retried() {
        let stage = StageDefinition::new("score", "primary")
            .with_max_retries(3)
            .with_fallback("backup");
        let backup = Arc::new(FailingService::new("backup"));
        let (resolver, executor, run) = setup(
            ServiceRegistry::new()
                .with(Arc::new(FailingService::new("primary")))
                .with(backup.clone()),
            &stage,
        );

        let primary = executor.execute(&stage, &run, run.carried()).await;
        let outcome = resolver.resolve(&stage, &run, run.carried(), &primary).await;

        assert_eq!(outcome.reason_code(), Some("unrecoverable"));
        assert_eq!(backup.calls(), 1);
        assert_eq!(outcome.attempts, 5);
        let detail = outcome.reason.unwrap().to_string();
        assert!(detail.contains("primary failed"));
        assert!(detail.contains("fallback backup failed"));
    }
}
