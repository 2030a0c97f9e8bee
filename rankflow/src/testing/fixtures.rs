//! Sample data and the standard discover -> score -> rerank pipeline.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::mocks::{AttributeScorer, StaticSource};
use crate::core::{CandidateItem, PipelineRequest};
use crate::pipeline::{PipelineDefinition, PipelineDefinitionBuilder, StageDefinition};
use crate::services::{DiscoveryService, ScoringService, ServiceRegistry};

/// Service names used by [`ranking_pipeline`] and [`ranking_services`].
pub mod names {
    /// Discovery service.
    pub const CATALOG: &str = "catalog";
    /// Primary scorer.
    pub const SCORER: &str = "rating-scorer";
    /// Reranker.
    pub const RERANKER: &str = "popularity-reranker";
    /// Pipeline name.
    pub const PIPELINE: &str = "ranking";
}

/// Five candidates with `rating` (0-5) and `popularity` (0-100).
///
/// Ratings tie between `c2` and `c4` so ordering tests see a stable tie.
#[must_use]
pub fn sample_candidates() -> Vec<CandidateItem> {
    [("c1", 3.0, 40.0), ("c2", 4.5, 10.0), ("c3", 2.0, 95.0), ("c4", 4.5, 70.0), ("c5", 1.0, 5.0)]
        .into_iter()
        .map(|(id, rating, popularity)| {
            CandidateItem::new(id)
                .with_attribute("rating", json!(rating))
                .with_attribute("popularity", json!(popularity))
        })
        .collect()
}

/// The three-stage pipeline: discover, score (retried), rerank (optional).
#[must_use]
pub fn ranking_pipeline() -> PipelineDefinition {
    ranking_pipeline_with(|stage| stage)
}

/// [`ranking_pipeline`] with each stage passed through `adjust` first.
#[must_use]
pub fn ranking_pipeline_with(adjust: impl Fn(StageDefinition) -> StageDefinition) -> PipelineDefinition {
    let stages = [
        StageDefinition::new("discover", names::CATALOG).with_timeout(Duration::from_secs(1)),
        StageDefinition::new("score", names::SCORER)
            .with_timeout(Duration::from_secs(1))
            .with_max_retries(2),
        StageDefinition::new("rerank", names::RERANKER)
            .optional()
            .with_timeout(Duration::from_secs(1)),
    ];

    let mut builder = PipelineDefinitionBuilder::new(names::PIPELINE);
    for stage in stages {
        if let Err(e) = builder.add_stage(adjust(stage)) {
            panic!("fixture stage rejected: {e}");
        }
    }
    match builder.build() {
        Ok(definition) => definition,
        Err(e) => panic!("fixture pipeline rejected: {e}"),
    }
}

/// Real adapters over deterministic stubs for every service of
/// [`ranking_pipeline`]. The score is `rating * 20`; rerank blends in
/// popularity at 50%.
#[must_use]
pub fn ranking_services() -> ServiceRegistry {
    ServiceRegistry::new()
        .with(Arc::new(DiscoveryService::new(
            names::CATALOG,
            Arc::new(StaticSource::new(sample_candidates())),
        )))
        .with(Arc::new(ScoringService::new(
            names::SCORER,
            Arc::new(AttributeScorer::new("rating", 20.0)),
        )))
        .with(Arc::new(
            ScoringService::new(names::RERANKER, Arc::new(AttributeScorer::new("popularity", 1.0)))
                .with_blend(0.5),
        ))
}

/// A request with a generous budget.
#[must_use]
pub fn sample_request() -> PipelineRequest {
    PipelineRequest::with_budget("tester", Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_pipeline_shape() {
        let pipeline = ranking_pipeline();
        let ids: Vec<_> = pipeline.stages().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["discover", "score", "rerank"]);
        assert!(!pipeline.stage("rerank").unwrap().required);
        assert_eq!(pipeline.stage("score").unwrap().max_retries, 2);

        let services = ranking_services();
        for stage in pipeline.stages() {
            assert!(services.contains(&stage.target_service));
        }
    }

    #[test]
    fn test_adjusted_pipeline() {
        let pipeline = ranking_pipeline_with(|stage| stage.with_timeout(Duration::from_millis(50)));
        assert!(pipeline.stages().iter().all(|s| s.timeout_ms == 50));
    }
}
