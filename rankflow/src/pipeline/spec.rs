//! Static stage and pipeline definitions.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

fn default_required() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5_000
}

/// One stage: a named step bound to exactly one backing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique id within the pipeline.
    pub id: String,
    /// Service the stage calls.
    pub target_service: String,
    /// Whether the pipeline can go on without this stage.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first failed call.
    #[serde(default)]
    pub max_retries: u32,
    /// Substitute service tried when a required stage fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_service: Option<String>,
    /// Output quality below this fails the stage.
    #[serde(default)]
    pub min_quality: f64,
    /// Calls skip the circuit breaker (diagnostic stages).
    #[serde(default)]
    pub bypass_breaker: bool,
}

impl StageDefinition {
    /// Creates a required stage with a 5 s timeout and no retries.
    #[must_use]
    pub fn new(id: impl Into<String>, target_service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_service: target_service.into(),
            required: default_required(),
            timeout_ms: default_timeout_ms(),
            max_retries: 0,
            fallback_service: None,
            min_quality: 0.0,
            bypass_breaker: false,
        }
    }

    /// Marks the stage optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the fallback service.
    #[must_use]
    pub fn with_fallback(mut self, service: impl Into<String>) -> Self {
        self.fallback_service = Some(service.into());
        self
    }

    /// Sets the quality threshold.
    #[must_use]
    pub fn with_min_quality(mut self, threshold: f64) -> Self {
        self.min_quality = threshold;
        self
    }

    /// Lets calls skip the circuit breaker.
    #[must_use]
    pub fn bypass_breaker(mut self) -> Self {
        self.bypass_breaker = true;
        self
    }

    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The synthetic definition used to call the fallback service:
    /// same timeout and threshold, no retries, no further fallback.
    #[must_use]
    pub fn fallback_definition(&self) -> Option<Self> {
        self.fallback_service.as_ref().map(|service| Self {
            id: self.id.clone(),
            target_service: service.clone(),
            required: self.required,
            timeout_ms: self.timeout_ms,
            max_retries: 0,
            fallback_service: None,
            min_quality: self.min_quality,
            bypass_breaker: self.bypass_breaker,
        })
    }

    /// Validates the definition on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyName { what: "Stage" });
        }
        if self.target_service.trim().is_empty() {
            return Err(ConfigError::EmptyName { what: "Service" });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                stage: self.id.clone(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_quality) {
            return Err(ConfigError::out_of_range(
                "stage.min_quality",
                "in [0, 1]",
                self.min_quality,
            ));
        }
        if let Some(fallback) = &self.fallback_service {
            if fallback.trim().is_empty() {
                return Err(ConfigError::EmptyName { what: "Fallback service" });
            }
            if fallback == &self.target_service {
                return Err(ConfigError::SelfFallback {
                    stage: self.id.clone(),
                    service: fallback.clone(),
                });
            }
        }
        Ok(())
    }

    /// Every service this stage may call.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.target_service.as_str()).chain(self.fallback_service.as_deref())
    }
}

/// A named, ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    name: String,
    stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    pub(crate) fn new_unchecked(name: String, stages: Vec<StageDefinition>) -> Self {
        Self { name, stages }
    }

    /// Parses and validates a JSON definition.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let definition: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Looks up a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Validates the whole definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName { what: "Pipeline" });
        }
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyPipeline {
                pipeline: self.name.clone(),
            });
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !seen.insert(stage.id.as_str()) {
                return Err(ConfigError::DuplicateStage {
                    pipeline: self.name.clone(),
                    stage: stage.id.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_definition_builder() {
        let stage = StageDefinition::new("score", "scorer")
            .optional()
            .with_timeout(Duration::from_millis(250))
            .with_max_retries(2)
            .with_fallback("backup-scorer")
            .with_min_quality(0.4);

        assert!(!stage.required);
        assert_eq!(stage.timeout(), Duration::from_millis(250));
        assert_eq!(stage.max_retries, 2);
        assert_eq!(stage.services().collect::<Vec<_>>(), vec!["scorer", "backup-scorer"]);
        assert!(stage.validate().is_ok());
    }

    #[test]
    fn test_fallback_definition() {
        let stage = StageDefinition::new("score", "scorer")
            .with_max_retries(3)
            .with_fallback("backup");

        let fallback = stage.fallback_definition().unwrap();
        assert_eq!(fallback.target_service, "backup");
        assert_eq!(fallback.max_retries, 0);
        assert_eq!(fallback.timeout_ms, stage.timeout_ms);
        assert!(fallback.fallback_service.is_none());

        assert!(StageDefinition::new("x", "y").fallback_definition().is_none());
    }

    #[test]
    fn test_stage_validation_errors() {
        assert!(matches!(
            StageDefinition::new("", "svc").validate(),
            Err(ConfigError::EmptyName { what: "Stage" })
        ));
        assert!(matches!(
            StageDefinition::new("s", "svc").with_timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroTimeout { .. })
        ));
        assert!(matches!(
            StageDefinition::new("s", "svc").with_min_quality(1.5).validate(),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            StageDefinition::new("s", "svc").with_fallback("svc").validate(),
            Err(ConfigError::SelfFallback { .. })
        ));
    }

    #[test]
    fn test_pipeline_from_json() {
        let definition = PipelineDefinition::from_json_str(
            r#"{
                "name": "ranking",
                "stages": [
                    { "id": "discover", "target_service": "catalog", "timeout_ms": 1000 },
                    { "id": "rerank", "target_service": "reranker", "required": false }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(definition.name(), "ranking");
        assert_eq!(definition.len(), 2);
        assert!(definition.stage("discover").unwrap().required);
        assert!(!definition.stage("rerank").unwrap().required);
        assert_eq!(definition.stage("rerank").unwrap().timeout_ms, 5_000);
    }

    #[test]
    fn test_pipeline_json_duplicate_stage() {
        let err = PipelineDefinition::from_json_str(
            r#"{ "name": "p", "stages": [
                { "id": "a", "target_service": "x" },
                { "id": "a", "target_service": "y" }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateStage { .. }));
    }
}
