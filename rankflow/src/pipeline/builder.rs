//! Pipeline definition builder with validation.

use super::{PipelineDefinition, StageDefinition};
use crate::errors::ConfigError;
use std::collections::HashSet;

/// Builder for validated pipeline definitions.
///
/// Each stage is checked as it is added, so a malformed definition fails at
/// the line that introduced the problem.
#[derive(Debug, Clone)]
pub struct PipelineDefinitionBuilder {
    name: String,
    stages: Vec<StageDefinition>,
    ids: HashSet<String>,
}

impl PipelineDefinitionBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid or its id is already used.
    pub fn stage(mut self, stage: StageDefinition) -> Result<Self, ConfigError> {
        self.add_stage(stage)?;
        Ok(self)
    }

    /// Appends a stage in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid or its id is already used.
    pub fn add_stage(&mut self, stage: StageDefinition) -> Result<(), ConfigError> {
        stage.validate()?;
        if !self.ids.insert(stage.id.clone()) {
            return Err(ConfigError::DuplicateStage {
                pipeline: self.name.clone(),
                stage: stage.id,
            });
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or there are no stages.
    pub fn build(self) -> Result<PipelineDefinition, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName { what: "Pipeline" });
        }
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyPipeline { pipeline: self.name });
        }
        Ok(PipelineDefinition::new_unchecked(self.name, self.stages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_in_order() {
        let definition = PipelineDefinitionBuilder::new("ranking")
            .stage(StageDefinition::new("discover", "catalog"))
            .unwrap()
            .stage(StageDefinition::new("score", "scorer"))
            .unwrap()
            .stage(StageDefinition::new("rerank", "reranker").optional())
            .unwrap()
            .build()
            .unwrap();

        let ids: Vec<_> = definition.stages().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["discover", "score", "rerank"]);
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = PipelineDefinitionBuilder::new("p")
            .stage(StageDefinition::new("a", "x"))
            .unwrap()
            .stage(StageDefinition::new("a", "y"))
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::DuplicateStage {
                pipeline: "p".into(),
                stage: "a".into()
            }
        );
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert!(matches!(
            PipelineDefinitionBuilder::new("p").build(),
            Err(ConfigError::EmptyPipeline { .. })
        ));
        assert!(matches!(
            PipelineDefinitionBuilder::new("  ")
                .stage(StageDefinition::new("a", "x"))
                .unwrap()
                .build(),
            Err(ConfigError::EmptyName { .. })
        ));
    }

    #[test]
    fn test_invalid_stage_rejected_on_add() {
        let mut builder = PipelineDefinitionBuilder::new("p");
        let err = builder
            .add_stage(StageDefinition::new("a", "x").with_fallback("x"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::SelfFallback { .. }));
        assert_eq!(builder.stage_count(), 0);
    }
}
