//! Executes one stage against its backing service.
//!
//! The executor owns the per-call policy: breaker admission, the effective
//! timeout, immediate retries, health recording and the quality gate. It
//! always returns a [`StageOutcome`]; nothing escapes as an error.

use super::{PipelineRun, StageDefinition};
use crate::breaker::{BreakerPermit, CircuitBreakerRegistry};
use crate::core::{FailureReason, StageData, StageOutcome};
use crate::health::HealthRegistry;
use crate::services::{ServiceRegistry, StageInput};
use crate::utils::{millis, now_utc, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

enum Attempt {
    Succeeded(StageData),
    Failed(FailureReason),
    Cancelled,
}

/// Runs stages. Cheap to clone; clones share the registries.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    services: Arc<ServiceRegistry>,
    health: Arc<HealthRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl StageExecutor {
    /// Creates an executor over shared registries.
    #[must_use]
    pub fn new(
        services: Arc<ServiceRegistry>,
        health: Arc<HealthRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            services,
            health,
            breakers,
        }
    }

    /// Health registry the executor records into.
    #[must_use]
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// Breaker registry the executor consults.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Executes `stage` with `carried` as input.
    ///
    /// Each attempt is bounded by the smaller of the stage timeout and the
    /// time left before the run deadline. Failed attempts are retried
    /// immediately up to `max_retries` times unless the run has been
    /// cancelled or its deadline has passed. Health sees every attempt; the
    /// breaker sees one result for the whole call.
    pub async fn execute(
        &self,
        stage: &StageDefinition,
        run: &PipelineRun,
        carried: Arc<StageData>,
    ) -> StageOutcome {
        let started_at = now_utc();
        let clock = Instant::now();
        let service_name = stage.target_service.as_str();

        let Some(service) = self.services.get(service_name) else {
            // Orchestrator construction rejects unknown services, so this
            // only happens when an executor is driven directly.
            return StageOutcome::failed(
                &stage.id,
                service_name,
                FailureReason::InvocationFailure {
                    message: format!("service '{service_name}' is not registered"),
                },
                started_at,
                clock.elapsed(),
            );
        };

        if let Some(reason) = run.abort_reason() {
            return StageOutcome::failed(&stage.id, service_name, reason, started_at, clock.elapsed());
        }

        let permit = if stage.bypass_breaker {
            BreakerPermit::bypass()
        } else {
            match self.breakers.try_acquire(service_name) {
                Ok(permit) => permit,
                Err(err) => {
                    debug!(stage_id = %stage.id, service = %service_name, "{err}");
                    return StageOutcome::failed(
                        &stage.id,
                        service_name,
                        FailureReason::CircuitOpen,
                        started_at,
                        clock.elapsed(),
                    );
                }
            }
        };

        let input = StageInput::new(Arc::clone(run.request()), carried, &stage.id);
        let mut attempts = 0u32;

        loop {
            let budget = stage.timeout().min(run.remaining());
            attempts += 1;
            let attempt_clock = Instant::now();

            let attempt = tokio::select! {
                biased;
                () = run.cancellation().cancelled() => Attempt::Cancelled,
                result = tokio::time::timeout(budget, service.invoke(&input)) => match result {
                    Ok(Ok(data)) => Attempt::Succeeded(data),
                    Ok(Err(err)) => Attempt::Failed(FailureReason::InvocationFailure {
                        message: err.to_string(),
                    }),
                    Err(_) if Instant::now() >= run.deadline() => {
                        Attempt::Failed(FailureReason::DeadlineExceeded)
                    }
                    Err(_) => Attempt::Failed(FailureReason::Timeout),
                },
            };

            match attempt {
                Attempt::Cancelled => {
                    // Dropping the permit unsettled frees a half-open probe
                    // slot without counting against the service.
                    debug!(stage_id = %stage.id, service = %service_name, "Stage call cancelled");
                    return StageOutcome::failed(
                        &stage.id,
                        service_name,
                        FailureReason::Cancelled,
                        started_at,
                        clock.elapsed(),
                    )
                    .with_attempts(attempts);
                }
                Attempt::Succeeded(data) => {
                    self.health.record(service_name, attempt_clock.elapsed(), true);
                    permit.record_success();
                    return self.check_quality(stage, data, started_at, clock.elapsed(), attempts);
                }
                Attempt::Failed(reason) => {
                    let latency = if matches!(reason, FailureReason::InvocationFailure { .. }) {
                        attempt_clock.elapsed()
                    } else {
                        budget
                    };
                    self.health.record(service_name, latency, false);
                    warn!(
                        stage_id = %stage.id,
                        service = %service_name,
                        attempt = attempts,
                        duration_ms = millis(latency),
                        reason = %reason,
                        "Stage attempt failed"
                    );

                    let out_of_retries = attempts > stage.max_retries;
                    if out_of_retries || run.abort_reason().is_some() {
                        permit.record_failure();
                        let reason = run.abort_reason().unwrap_or(reason);
                        return StageOutcome::failed(&stage.id, service_name, reason, started_at, clock.elapsed())
                            .with_attempts(attempts);
                    }
                }
            }
        }
    }

    fn check_quality(
        &self,
        stage: &StageDefinition,
        data: StageData,
        started_at: Timestamp,
        elapsed: Duration,
        attempts: u32,
    ) -> StageOutcome {
        match data.quality {
            Some(quality) if quality < stage.min_quality => {
                warn!(
                    stage_id = %stage.id,
                    service = %stage.target_service,
                    quality,
                    threshold = stage.min_quality,
                    "Stage output below quality threshold"
                );
                StageOutcome::failed(
                    &stage.id,
                    &stage.target_service,
                    FailureReason::BelowQuality {
                        quality,
                        threshold: stage.min_quality,
                    },
                    started_at,
                    elapsed,
                )
                .with_attempts(attempts)
            }
            _ => {
                debug!(
                    stage_id = %stage.id,
                    service = %stage.target_service,
                    items = data.len(),
                    duration_ms = millis(elapsed),
                    "Stage completed"
                );
                StageOutcome::completed(&stage.id, &stage.target_service, data, started_at, elapsed)
                    .with_attempts(attempts)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::config::{BreakerConfig, HealthConfig};
    use crate::core::{CircuitState, OutcomeStatus, PipelineRequest};
    use crate::pipeline::PipelineDefinitionBuilder;
    use crate::testing::{FailingService, ScriptedService, SlowService, StaticService, Step};

    fn executor(services: ServiceRegistry, breaker: BreakerConfig) -> StageExecutor {
        StageExecutor::new(
            Arc::new(services),
            Arc::new(HealthRegistry::new(HealthConfig::default())),
            Arc::new(CircuitBreakerRegistry::new(breaker)),
        )
    }

    fn run_for(stage: &StageDefinition, budget: Duration) -> PipelineRun {
        let definition = PipelineDefinitionBuilder::new("p")
            .stage(stage.clone())
            .unwrap()
            .build()
            .unwrap();
        let mut run = PipelineRun::new(
            Arc::new(PipelineRequest::with_budget("tester", budget)),
            Arc::new(definition),
            Arc::new(CancellationToken::new()),
        );
        run.start().unwrap();
        run
    }

    #[tokio::test]
    async fn test_success_records_health_and_breaker() {
        let exec = executor(
            ServiceRegistry::new().with(Arc::new(StaticService::with_ids("svc", &["a", "b"]))),
            BreakerConfig::default(),
        );
        let stage = StageDefinition::new("s", "svc");
        let run = run_for(&stage, Duration::from_secs(5));

        let outcome = exec.execute(&stage, &run, run.carried()).await;

        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.output.unwrap().len(), 2);
        let health = exec.health().snapshot("svc").unwrap();
        assert_eq!((health.successes, health.failures), (1, 0));
        assert_eq!(exec.breakers().snapshot("svc").unwrap().total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success_with_retries() {
        let exec = executor(
            ServiceRegistry::new().with(Arc::new(ScriptedService::new(
                "svc",
                vec![Step::Delay(Duration::from_secs(10)), Step::Ok],
            ))),
            BreakerConfig::default(),
        );
        let stage = StageDefinition::new("s", "svc")
            .with_timeout(Duration::from_millis(100))
            .with_max_retries(2);
        let run = run_for(&stage, Duration::from_secs(60));

        let outcome = exec.execute(&stage, &run, run.carried()).await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.attempts, 2);
        let health = exec.health().snapshot("svc").unwrap();
        assert_eq!((health.successes, health.failures), (1, 1));
        // The timed-out attempt seeds latency with its 100ms budget, then the
        // instant success pulls it down by alpha.
        assert!((health.ema_latency_ms - 70.0).abs() < 1e-9);
        let breaker = exec.breakers().snapshot("svc").unwrap();
        assert_eq!(breaker.state, CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures, 0);
        assert_eq!(breaker.total_requests, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_one_breaker_failure() {
        let exec = executor(
            ServiceRegistry::new().with(Arc::new(FailingService::new("svc"))),
            BreakerConfig::default(),
        );
        let stage = StageDefinition::new("s", "svc").with_max_retries(2);
        let run = run_for(&stage, Duration::from_secs(5));

        let outcome = exec.execute(&stage, &run, run.carried()).await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.reason_code(), Some("invocation_failure"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(exec.health().snapshot("svc").unwrap().failures, 3);
        assert_eq!(exec.breakers().snapshot("svc").unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_invocation() {
        let failing = Arc::new(FailingService::new("svc"));
        let exec = executor(
            ServiceRegistry::new().with(failing.clone()),
            BreakerConfig::default().with_failure_threshold(1),
        );
        let stage = StageDefinition::new("s", "svc");
        let run = run_for(&stage, Duration::from_secs(5));

        exec.execute(&stage, &run, run.carried()).await;
        assert_eq!(exec.breakers().state("svc"), CircuitState::Open);

        let outcome = exec.execute(&stage, &run, run.carried()).await;
        assert_eq!(outcome.reason, Some(FailureReason::CircuitOpen));
        assert_eq!(outcome.attempts, 0);
        assert_eq!(failing.calls(), 1);
    }

    #[tokio::test]
    async fn test_bypass_breaker_still_invokes() {
        let failing = Arc::new(FailingService::new("svc"));
        let exec = executor(
            ServiceRegistry::new().with(failing.clone()),
            BreakerConfig::default().with_failure_threshold(1),
        );
        let guarded = StageDefinition::new("s", "svc");
        let diagnostic = StageDefinition::new("s", "svc").bypass_breaker();
        let run = run_for(&guarded, Duration::from_secs(5));

        exec.execute(&guarded, &run, run.carried()).await;
        let outcome = exec.execute(&diagnostic, &run, run.carried()).await;

        assert_eq!(outcome.reason_code(), Some("invocation_failure"));
        assert_eq!(failing.calls(), 2);
    }

    #[tokio::test]
    async fn test_below_quality_fails_without_retry() {
        let exec = executor(
            ServiceRegistry::new().with(Arc::new(
                StaticService::with_ids("svc", &["a"]).with_quality(0.2),
            )),
            BreakerConfig::default(),
        );
        let stage = StageDefinition::new("s", "svc")
            .with_min_quality(0.5)
            .with_max_retries(3);
        let run = run_for(&stage, Duration::from_secs(5));

        let outcome = exec.execute(&stage, &run, run.carried()).await;

        assert_eq!(outcome.reason_code(), Some("below_quality"));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(exec.health().snapshot("svc").unwrap().successes, 1);
        assert_eq!(exec.breakers().snapshot("svc").unwrap().total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_caps_attempt_and_stops_retries() {
        let slow = Arc::new(SlowService::new("svc", Duration::from_secs(10)));
        let exec = executor(ServiceRegistry::new().with(slow.clone()), BreakerConfig::default());
        let stage = StageDefinition::new("s", "svc")
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(5);
        let run = run_for(&stage, Duration::from_secs(1));

        let started = Instant::now();
        let outcome = exec.execute(&stage, &run, run.carried()).await;

        assert_eq!(outcome.reason, Some(FailureReason::DeadlineExceeded));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(slow.calls(), 1);
        assert!(started.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_drops_in_flight_call() {
        let exec = executor(
            ServiceRegistry::new().with(Arc::new(SlowService::new("svc", Duration::from_secs(30)))),
            BreakerConfig::default(),
        );
        let stage = StageDefinition::new("s", "svc").with_timeout(Duration::from_secs(60));
        let run = run_for(&stage, Duration::from_secs(120));
        let token = Arc::clone(run.cancellation());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel("caller gone");
        });
        let outcome = exec.execute(&stage, &run, run.carried()).await;

        assert_eq!(outcome.reason, Some(FailureReason::Cancelled));
        assert!(exec.health().snapshot("svc").is_none());
        assert_eq!(exec.breakers().snapshot("svc").unwrap().total_failures, 0);
    }

    #[tokio::test]
    async fn test_unregistered_service_is_failure() {
        let exec = executor(ServiceRegistry::new(), BreakerConfig::default());
        let stage = StageDefinition::new("s", "ghost");
        let run = run_for(&stage, Duration::from_secs(5));

        let outcome = exec.execute(&stage, &run, run.carried()).await;
        assert_eq!(outcome.reason_code(), Some("invocation_failure"));
        assert_eq!(outcome.attempts, 0);
    }
}
