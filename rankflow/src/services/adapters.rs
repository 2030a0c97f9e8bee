//! Adapters turning collaborators into pipeline services.

use super::{CandidateSource, PipelineService, Scorer, ScoringContext, StageInput};
use crate::core::{clamp_unit, ScoredItem, StageData};
use crate::errors::ServiceError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// Fetches the candidate pool from a [`CandidateSource`].
///
/// Ignores the carried input; discovery starts a pipeline.
#[derive(Debug)]
pub struct DiscoveryService {
    name: String,
    source: Arc<dyn CandidateSource>,
    limit: Option<usize>,
}

impl DiscoveryService {
    /// Creates a discovery service.
    #[must_use]
    pub fn new(name: impl Into<String>, source: Arc<dyn CandidateSource>) -> Self {
        Self {
            name: name.into(),
            source,
            limit: None,
        }
    }

    /// Keeps at most `limit` candidates.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
impl PipelineService for DiscoveryService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: &StageInput) -> Result<StageData, ServiceError> {
        let mut candidates = self.source.fetch(&input.request.payload.filters).await?;
        if let Some(limit) = self.limit {
            candidates.truncate(limit);
        }
        debug!(service = %self.name, candidates = candidates.len(), "Candidates fetched");

        Ok(StageData::from_items(
            candidates
                .into_iter()
                .map(|item| ScoredItem::unscored(item).with_reason(format!("found by {}", self.name)))
                .collect(),
        ))
    }
}

/// Scores every carried item with a [`Scorer`], fanning out over a bounded pool.
///
/// `blend` mixes the new score with the carried one:
/// `score = blend * new + (1 - blend) * previous`. A blend of 1 replaces the
/// carried score; rerank stages typically use less. Items whose scoring
/// fails keep their carried score. If every item fails the call fails.
#[derive(Debug)]
pub struct ScoringService {
    name: String,
    scorer: Arc<dyn Scorer>,
    concurrency: usize,
    blend: f64,
}

impl ScoringService {
    /// Creates a scoring service that replaces carried scores.
    #[must_use]
    pub fn new(name: impl Into<String>, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            name: name.into(),
            scorer,
            concurrency: 8,
            blend: 1.0,
        }
    }

    /// Sets the maximum number of items scored at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the blend weight, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_blend(mut self, blend: f64) -> Self {
        self.blend = clamp_unit(blend);
        self
    }
}

#[async_trait]
impl PipelineService for ScoringService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: &StageInput) -> Result<StageData, ServiceError> {
        if input.carried.is_empty() {
            return Ok(StageData::new());
        }

        let request = &input.request;
        let calls: Vec<_> = input
            .carried
            .items
            .iter()
            .map(|carried| {
                let context = ScoringContext {
                    request_id: request.id,
                    query: request.payload.query.clone(),
                    previous_score: carried.score,
                };
                async move {
                    let result = self.scorer.score(&carried.item, &context).await;
                    (carried, result)
                }
            })
            .collect();
        // `buffered` keeps input order, so ties stay stable downstream.
        let results: Vec<_> = stream::iter(calls)
            .buffered(self.concurrency)
            .collect()
            .await;

        let total = results.len();
        let mut items = Vec::with_capacity(total);
        let mut scored_confidence = 0.0;
        let mut scored = 0usize;
        let mut first_error = None;

        for (carried, result) in results {
            match result {
                Ok(score) => {
                    let value = self.blend.mul_add(score.value, (1.0 - self.blend) * carried.score);
                    let confidence = self
                        .blend
                        .mul_add(score.confidence, (1.0 - self.blend) * carried.confidence);
                    scored_confidence += score.confidence;
                    scored += 1;
                    items.push(
                        carried
                            .clone()
                            .with_score(value, confidence)
                            .with_reason(format!("{}: {:.1}", self.name, score.value)),
                    );
                }
                Err(err) => {
                    debug!(service = %self.name, item = %carried.id(), error = %err, "Item not scored");
                    first_error.get_or_insert(err);
                    items.push(carried.clone());
                }
            }
        }

        if scored == 0 {
            return Err(first_error
                .unwrap_or_else(|| ServiceError::internal(&self.name, "no items scored")));
        }

        let coverage = scored as f64 / total as f64;
        let quality = (scored_confidence / scored as f64) * coverage;
        Ok(StageData::from_items(items).with_quality(quality))
    }
}
