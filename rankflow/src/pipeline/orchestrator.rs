//! Drives requests through their pipeline.

use super::{FallbackResolver, PipelineDefinition, PipelineRun, ResultAssembler, StageExecutor};
use crate::breaker::{CircuitBreakerRegistry, CircuitBreakerState};
use crate::cancellation::{CancellationToken, Scheduler};
use crate::config::RankflowConfig;
use crate::core::{FailureReason, HealthStatus, PipelineRequest, ProcessingResult, RunStatus, StageOutcome};
use crate::errors::{ConfigError, Result as RankflowResult};
use crate::events::{EventKind, EventSink, NoOpEventSink, PipelineEvent};
use crate::health::{HealthRegistry, ServiceHealth};
use crate::services::{PersistenceSink, PipelineService, ServiceRegistry};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Builder for [`Orchestrator`].
///
/// Registries not supplied are created from the configuration. Supplying
/// them lets several orchestrators share health and breaker state.
pub struct OrchestratorBuilder {
    config: RankflowConfig,
    services: ServiceRegistry,
    pipelines: Vec<PipelineDefinition>,
    default_pipeline: Option<String>,
    health: Option<Arc<HealthRegistry>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    events: Arc<dyn EventSink>,
    persistence: Option<Arc<dyn PersistenceSink>>,
}

impl OrchestratorBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RankflowConfig::default(),
            services: ServiceRegistry::new(),
            pipelines: Vec::new(),
            default_pipeline: None,
            health: None,
            breakers: None,
            events: Arc::new(NoOpEventSink),
            persistence: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: RankflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads the configuration from a JSON file.
    pub fn config_file(self, path: impl AsRef<Path>) -> RankflowResult<Self> {
        let config = RankflowConfig::from_json_file(path)?;
        Ok(self.config(config))
    }

    /// Registers a service.
    #[must_use]
    pub fn service(mut self, service: Arc<dyn PipelineService>) -> Self {
        self.services.register(service);
        self
    }

    /// Replaces the service registry.
    #[must_use]
    pub fn services(mut self, services: ServiceRegistry) -> Self {
        self.services = services;
        self
    }

    /// Adds a pipeline. The first one added is the default unless
    /// [`default_pipeline`](Self::default_pipeline) says otherwise.
    #[must_use]
    pub fn pipeline(mut self, definition: PipelineDefinition) -> Self {
        self.pipelines.push(definition);
        self
    }

    /// Names the pipeline used when a request has no `pipeline_type`.
    #[must_use]
    pub fn default_pipeline(mut self, name: impl Into<String>) -> Self {
        self.default_pipeline = Some(name.into());
        self
    }

    /// Shares a health registry.
    #[must_use]
    pub fn health_registry(mut self, health: Arc<HealthRegistry>) -> Self {
        self.health = Some(health);
        self
    }

    /// Shares a breaker registry.
    #[must_use]
    pub fn breaker_registry(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the persistence sink.
    #[must_use]
    pub fn persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    /// Validates the static configuration and builds the orchestrator.
    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        self.config.validate()?;
        if self.pipelines.is_empty() {
            return Err(ConfigError::NoPipelines);
        }

        let mut pipelines = HashMap::with_capacity(self.pipelines.len());
        let mut first = None;
        for definition in self.pipelines {
            definition.validate()?;
            for stage in definition.stages() {
                for service in stage.services() {
                    if !self.services.contains(service) {
                        return Err(ConfigError::UnknownService {
                            stage: stage.id.clone(),
                            service: service.to_string(),
                        });
                    }
                }
            }
            let name = definition.name().to_string();
            if pipelines.contains_key(&name) {
                return Err(ConfigError::DuplicatePipeline { pipeline: name });
            }
            first.get_or_insert_with(|| name.clone());
            pipelines.insert(name, Arc::new(definition));
        }

        let default_pipeline = match self.default_pipeline {
            Some(name) if !pipelines.contains_key(&name) => {
                return Err(ConfigError::UnknownDefaultPipeline { pipeline: name });
            }
            Some(name) => name,
            None => first.ok_or(ConfigError::NoPipelines)?,
        };

        let health = self
            .health
            .unwrap_or_else(|| Arc::new(HealthRegistry::new(self.config.health.clone())));
        let breakers = self
            .breakers
            .unwrap_or_else(|| Arc::new(CircuitBreakerRegistry::new(self.config.breaker.clone())));
        let executor = StageExecutor::new(Arc::new(self.services), Arc::clone(&health), Arc::clone(&breakers));

        info!(
            pipelines = pipelines.len(),
            default_pipeline = %default_pipeline,
            workers = self.config.executor.worker_pool_size,
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            slots: Arc::new(Semaphore::new(self.config.executor.worker_pool_size)),
            fallback: FallbackResolver::new(executor.clone()),
            assembler: ResultAssembler::new(self.config.assembler.clone()),
            executor,
            pipelines,
            default_pipeline,
            health,
            breakers,
            events: self.events,
            persistence: self.persistence,
            config: self.config,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point: accepts requests and always answers with a result.
///
/// Runs are independent; they share only the health and breaker registries.
/// At most `executor.worker_pool_size` runs execute at once.
pub struct Orchestrator {
    pipelines: HashMap<String, Arc<PipelineDefinition>>,
    default_pipeline: String,
    executor: StageExecutor,
    fallback: FallbackResolver,
    assembler: ResultAssembler,
    health: Arc<HealthRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    events: Arc<dyn EventSink>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    slots: Arc<Semaphore>,
    config: RankflowConfig,
}

impl Orchestrator {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &RankflowConfig {
        &self.config
    }

    /// Looks up a registered pipeline.
    #[must_use]
    pub fn pipeline(&self, name: &str) -> Option<&PipelineDefinition> {
        self.pipelines.get(name).map(AsRef::as_ref)
    }

    /// Name of the default pipeline.
    #[must_use]
    pub fn default_pipeline(&self) -> &str {
        &self.default_pipeline
    }

    /// Shared health registry.
    #[must_use]
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// Shared breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Health of every known service, sorted by name.
    #[must_use]
    pub fn health_report(&self) -> Vec<ServiceHealth> {
        self.health.report()
    }

    /// Breaker state of every known service, sorted by name.
    #[must_use]
    pub fn breaker_report(&self) -> Vec<CircuitBreakerState> {
        self.breakers.report()
    }

    /// Forces a service's breaker closed. Returns false if it never existed.
    pub fn reset_breaker(&self, service: &str) -> bool {
        self.breakers.reset(service)
    }

    /// Starts the periodic health sweep. Dropping or shutting down the
    /// returned scheduler stops it.
    pub fn start_background_tasks(&self) -> Scheduler {
        let mut scheduler = Scheduler::new();
        let health = Arc::clone(&self.health);
        scheduler.every("health-sweep", self.config.health.sweep_interval(), move || {
            let stale = health.sweep();
            if stale.is_empty() {
                debug!("Health sweep found no stale services");
            } else {
                warn!(services = ?stale, "Health sweep marked services failed");
            }
        });
        scheduler
    }

    /// Runs `request` to completion.
    pub async fn submit(&self, request: PipelineRequest) -> ProcessingResult {
        self.submit_with_cancellation(request, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs `request`, stopping early if `cancellation` fires.
    ///
    /// Cancellation drops the in-flight stage call and finishes the run as
    /// timed out with whatever output exists.
    pub async fn submit_with_cancellation(
        &self,
        request: PipelineRequest,
        cancellation: Arc<CancellationToken>,
    ) -> ProcessingResult {
        let pipeline_name = request
            .pipeline_type
            .clone()
            .unwrap_or_else(|| self.default_pipeline.clone());
        let Some(definition) = self.pipelines.get(&pipeline_name).cloned() else {
            warn!(request_id = %request.id, pipeline = %pipeline_name, "Unknown pipeline type");
            let result = self.assembler.unknown_pipeline(request.id, &pipeline_name);
            self.events.try_emit(
                PipelineEvent::new(EventKind::PipelineFailed, result.diagnostics.run_id)
                    .with_data(json!({ "request_id": request.id, "pipeline": pipeline_name, "reason": "unknown_pipeline" })),
            );
            return result;
        };

        let mut run = PipelineRun::new(Arc::new(request), definition, cancellation);

        // Wait for a worker slot; the deadline and cancellation still apply.
        let _slot = tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => permit.ok(),
            () = run.cancellation().cancelled() => None,
            () = tokio::time::sleep_until(run.deadline()) => None,
        };

        if let Err(e) = run.start() {
            error!(run_id = %run.id(), error = %e, "Run could not start");
        }
        info!(
            run_id = %run.id(),
            request_id = %run.request().id,
            pipeline = %run.definition().name(),
            budget_ms = crate::utils::millis(run.remaining()),
            "Pipeline started"
        );
        self.emit(&run, EventKind::PipelineStarted, json!({
            "request_id": run.request().id,
            "pipeline": run.definition().name(),
        }));

        let span = info_span!("pipeline_run", run_id = %run.id(), pipeline = %run.definition().name());
        let status = self.drive(&mut run).instrument(span).await;
        if let Err(e) = run.finish(status) {
            error!(run_id = %run.id(), error = %e, "Run could not finish");
        }

        let result = self.assembler.assemble(&run, self.touched_health(&run));
        self.report(&run, &result);
        self.persist(&result);
        result
    }

    async fn drive(&self, run: &mut PipelineRun) -> RunStatus {
        while let Some(stage) = run.current_stage().cloned() {
            if let Some(reason) = run.abort_reason() {
                info!(run_id = %run.id(), stage_id = %stage.id, reason = %reason, "Run stopped before stage");
                return RunStatus::TimedOut;
            }

            let carried = run.carried();
            let outcome = self.executor.execute(&stage, run, Arc::clone(&carried)).await;
            if outcome.is_completed() {
                self.stage_event(run, EventKind::StageCompleted, &outcome);
                run.record(outcome);
                continue;
            }
            if is_abort(&outcome) {
                self.stage_event(run, EventKind::StageFailed, &outcome);
                run.record(outcome);
                return RunStatus::TimedOut;
            }
            if !stage.required {
                let skipped = outcome.into_skipped();
                self.stage_event(run, EventKind::StageSkipped, &skipped);
                run.record(skipped);
                continue;
            }

            self.stage_event(run, EventKind::StageFailed, &outcome);
            if stage.fallback_service.is_some() {
                self.emit(run, EventKind::StageFallback, json!({
                    "stage_id": stage.id,
                    "service": stage.target_service,
                    "fallback": stage.fallback_service,
                }));
            }
            let resolved = self.fallback.resolve(&stage, run, carried, &outcome).await;
            if resolved.is_completed() {
                self.stage_event(run, EventKind::StageCompleted, &resolved);
                run.record(resolved);
                continue;
            }

            let aborted = is_abort(&resolved);
            self.stage_event(run, EventKind::StageFailed, &resolved);
            run.record(resolved);
            return if aborted { RunStatus::TimedOut } else { RunStatus::Failed };
        }
        RunStatus::Completed
    }

    fn touched_health(&self, run: &PipelineRun) -> BTreeMap<String, HealthStatus> {
        run.outcomes()
            .iter()
            .map(|o| (o.service.clone(), self.health.status(&o.service)))
            .collect()
    }

    fn report(&self, run: &PipelineRun, result: &ProcessingResult) {
        let kind = match run.status() {
            RunStatus::Completed => EventKind::PipelineCompleted,
            RunStatus::TimedOut => EventKind::PipelineTimedOut,
            _ => EventKind::PipelineFailed,
        };
        info!(
            run_id = %run.id(),
            status = %run.status(),
            stages_completed = result.diagnostics.stages_completed,
            stages_defined = result.diagnostics.stages_defined,
            fallbacks_used = result.diagnostics.fallbacks_used,
            confidence = result.confidence,
            duration_ms = result.diagnostics.total_duration_ms,
            "Pipeline finished"
        );
        self.emit(run, kind, json!({
            "request_id": result.request_id,
            "status": run.status(),
            "items": result.items.len(),
            "confidence": result.confidence,
            "degraded": result.degraded,
        }));
    }

    fn persist(&self, result: &ProcessingResult) {
        let Some(sink) = self.persistence.clone() else {
            return;
        };
        let result = result.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.persist(&result).await {
                warn!(request_id = %result.request_id, error = %e, "Persisting result failed");
            }
        });
    }

    fn stage_event(&self, run: &PipelineRun, kind: EventKind, outcome: &StageOutcome) {
        self.emit(run, kind, json!({
            "stage_id": outcome.stage_id,
            "service": outcome.service,
            "attempts": outcome.attempts,
            "from_fallback": outcome.from_fallback,
            "duration_ms": outcome.duration_ms,
            "reason": outcome.reason_code(),
        }));
    }

    fn emit(&self, run: &PipelineRun, kind: EventKind, data: serde_json::Value) {
        self.events
            .try_emit(PipelineEvent::new(kind, run.id()).with_data(data));
    }
}

fn is_abort(outcome: &StageOutcome) -> bool {
    outcome.reason.as_ref().is_some_and(FailureReason::is_run_abort)
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("services", &self.services)
            .field("pipelines", &self.pipelines)
            .field("default_pipeline", &self.default_pipeline)
            .field("persistence", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut pipelines: Vec<_> = self.pipelines.keys().collect();
        pipelines.sort();
        f.debug_struct("Orchestrator")
            .field("pipelines", &pipelines)
            .field("default_pipeline", &self.default_pipeline)
            .field("persistence", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineDefinitionBuilder, StageDefinition};
    use crate::errors::RankflowError;
    use crate::testing::{ranking_pipeline, ranking_services, StaticService};
    use std::io::Write;

    fn single(name: &str, service: &str) -> PipelineDefinition {
        PipelineDefinitionBuilder::new(name)
            .stage(StageDefinition::new("only", service))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_pipeline() {
        let err = Orchestrator::builder().build().unwrap_err();
        assert_eq!(err, ConfigError::NoPipelines);
    }

    #[test]
    fn test_build_rejects_unknown_service() {
        let err = Orchestrator::builder()
            .pipeline(single("p", "ghost"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownService {
                stage: "only".into(),
                service: "ghost".into()
            }
        );
    }

    #[test]
    fn test_build_rejects_unknown_fallback_service() {
        let definition = PipelineDefinitionBuilder::new("p")
            .stage(StageDefinition::new("only", "svc").with_fallback("backup"))
            .unwrap()
            .build()
            .unwrap();
        let err = Orchestrator::builder()
            .service(Arc::new(StaticService::with_ids("svc", &["a"])))
            .pipeline(definition)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownService { service, .. } if service == "backup"));
    }

    #[test]
    fn test_build_rejects_duplicate_and_unknown_default() {
        let builder = || {
            Orchestrator::builder().service(Arc::new(StaticService::with_ids("svc", &["a"])))
        };

        let err = builder()
            .pipeline(single("p", "svc"))
            .pipeline(single("p", "svc"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePipeline { .. }));

        let err = builder()
            .pipeline(single("p", "svc"))
            .default_pipeline("q")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDefaultPipeline { .. }));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = RankflowConfig::default()
            .with_executor(crate::config::ExecutorConfig::default().with_worker_pool_size(0));
        let err = Orchestrator::builder()
            .config(config)
            .services(ranking_services())
            .pipeline(ranking_pipeline())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));

        let config = RankflowConfig::default().with_executor(
            crate::config::ExecutorConfig::default().with_worker_pool_size(Semaphore::MAX_PERMITS + 1),
        );
        let err = Orchestrator::builder()
            .config(config)
            .services(ranking_services())
            .pipeline(ranking_pipeline())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "executor.worker_pool_size", .. }));
    }

    #[test]
    fn test_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "executor": {{ "worker_pool_size": 2 }} }}"#).unwrap();

        let orchestrator = Orchestrator::builder()
            .config_file(file.path())
            .unwrap()
            .services(ranking_services())
            .pipeline(ranking_pipeline())
            .build()
            .unwrap();
        assert_eq!(orchestrator.config().executor.worker_pool_size, 2);

        let err = Orchestrator::builder()
            .config_file("/definitely/not/here.json")
            .unwrap_err();
        assert!(matches!(err, RankflowError::Config(ConfigError::Parse(_))));

        let mut invalid = tempfile::NamedTempFile::new().unwrap();
        write!(invalid, r#"{{ "health": {{ "sweep_interval_seconds": 1e20 }} }}"#).unwrap();
        let err = Orchestrator::builder().config_file(invalid.path()).unwrap_err();
        assert!(matches!(err, RankflowError::Config(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_default_pipeline_selection() {
        let orchestrator = Orchestrator::builder()
            .service(Arc::new(StaticService::with_ids("svc", &["a"])))
            .pipeline(single("first", "svc"))
            .pipeline(single("second", "svc"))
            .default_pipeline("second")
            .build()
            .unwrap();

        assert_eq!(orchestrator.default_pipeline(), "second");
        assert!(orchestrator.pipeline("first").is_some());
        assert!(orchestrator.pipeline("third").is_none());
    }
}
