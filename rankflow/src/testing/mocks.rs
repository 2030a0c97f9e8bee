//! Stub services and collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{CandidateItem, ScoredItem, StageData};
use crate::errors::ServiceError;
use crate::services::{CandidateSource, PipelineService, Score, Scorer, ScoringContext, StageInput};

/// Always returns the same output.
#[derive(Debug)]
pub struct StaticService {
    name: String,
    output: StageData,
    calls: AtomicUsize,
}

impl StaticService {
    /// Creates a service returning `output`.
    #[must_use]
    pub fn new(name: impl Into<String>, output: StageData) -> Self {
        Self {
            name: name.into(),
            output,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns unscored items with the given ids.
    #[must_use]
    pub fn with_ids(name: impl Into<String>, ids: &[&str]) -> Self {
        let items = ids
            .iter()
            .map(|id| ScoredItem::unscored(CandidateItem::new(*id)))
            .collect();
        Self::new(name, StageData::from_items(items))
    }

    /// Returns items with the given ids and scores, confidence 1.
    #[must_use]
    pub fn with_scores(name: impl Into<String>, scores: &[(&str, f64)]) -> Self {
        let items = scores
            .iter()
            .map(|(id, score)| ScoredItem::unscored(CandidateItem::new(*id)).with_score(*score, 1.0))
            .collect();
        Self::new(name, StageData::from_items(items))
    }

    /// Sets the quality reported with the output.
    #[must_use]
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.output = self.output.with_quality(quality);
        self
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PipelineService for StaticService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _input: &StageInput) -> Result<StageData, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Always fails with an unavailable error.
#[derive(Debug)]
pub struct FailingService {
    name: String,
    message: String,
    calls: AtomicUsize,
}

impl FailingService {
    /// Creates a failing service.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: "service unavailable".to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PipelineService for FailingService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _input: &StageInput) -> Result<StageData, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ServiceError::unavailable(&self.name, &self.message))
    }
}

/// Sleeps, then passes the carried input through.
#[derive(Debug)]
pub struct SlowService {
    name: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowService {
    /// Creates a service that answers after `delay`.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of invocations, including abandoned ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PipelineService for SlowService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: &StageInput) -> Result<StageData, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok((*input.carried).clone())
    }
}

/// One scripted reaction of a [`ScriptedService`].
#[derive(Debug, Clone)]
pub enum Step {
    /// Pass the carried input through.
    Ok,
    /// Return this output.
    Return(StageData),
    /// Fail with an unavailable error.
    Fail,
    /// Sleep, then pass the carried input through.
    Delay(Duration),
}

/// Plays back a script, one step per call, then passes input through.
#[derive(Debug)]
pub struct ScriptedService {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedService {
    /// Creates a service that follows `steps`.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Steps not yet played.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }
}

#[async_trait]
impl PipelineService for ScriptedService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: &StageInput) -> Result<StageData, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front().unwrap_or(Step::Ok);
        match step {
            Step::Ok => Ok((*input.carried).clone()),
            Step::Return(data) => Ok(data),
            Step::Fail => Err(ServiceError::unavailable(&self.name, "scripted failure")),
            Step::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok((*input.carried).clone())
            }
        }
    }
}

/// Counts calls to any wrapped service.
#[derive(Debug)]
pub struct CountingService {
    inner: Arc<dyn PipelineService>,
    calls: AtomicUsize,
}

impl CountingService {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn PipelineService>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PipelineService for CountingService {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, input: &StageInput) -> Result<StageData, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.invoke(input).await
    }
}

/// A candidate source serving a fixed list, filtered by exact attribute match.
#[derive(Debug, Clone)]
pub struct StaticSource {
    items: Vec<CandidateItem>,
}

impl StaticSource {
    /// Creates a source over `items`.
    #[must_use]
    pub fn new(items: Vec<CandidateItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    async fn fetch(
        &self,
        filters: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Vec<CandidateItem>, ServiceError> {
        Ok(self
            .items
            .iter()
            .filter(|item| {
                filters
                    .iter()
                    .all(|(key, value)| item.attributes.get(key) == Some(value))
            })
            .cloned()
            .collect())
    }
}

/// Deterministic scorer: `value = attribute * scale`.
///
/// Items missing the attribute fail to score.
#[derive(Debug, Clone)]
pub struct AttributeScorer {
    attribute: String,
    scale: f64,
    confidence: f64,
}

impl AttributeScorer {
    /// Creates a scorer reading `attribute`.
    #[must_use]
    pub fn new(attribute: impl Into<String>, scale: f64) -> Self {
        Self {
            attribute: attribute.into(),
            scale,
            confidence: 0.9,
        }
    }

    /// Sets the confidence attached to every score.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[async_trait]
impl Scorer for AttributeScorer {
    async fn score(&self, item: &CandidateItem, _context: &ScoringContext) -> Result<Score, ServiceError> {
        item.number(&self.attribute)
            .map(|value| Score::new(value * self.scale, self.confidence))
            .ok_or_else(|| {
                ServiceError::invalid_input(
                    "attribute-scorer",
                    format!("item '{}' has no numeric '{}'", item.id, self.attribute),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineRequest;
    use serde_json::json;

    fn input() -> StageInput {
        StageInput::new(
            Arc::new(PipelineRequest::with_budget("tester", Duration::from_secs(5))),
            Arc::new(StageData::from_items(vec![ScoredItem::unscored(CandidateItem::new("carried"))])),
            "stage",
        )
    }

    #[tokio::test]
    async fn test_scripted_service_plays_steps_then_passes_through() {
        let service = ScriptedService::new("svc", vec![Step::Fail, Step::Return(StageData::new())]);

        assert!(service.invoke(&input()).await.is_err());
        assert!(service.invoke(&input()).await.unwrap().is_empty());
        assert_eq!(service.invoke(&input()).await.unwrap().items[0].id(), "carried");
        assert_eq!(service.calls(), 3);
        assert_eq!(service.remaining(), 0);
    }

    #[tokio::test]
    async fn test_counting_service_delegates() {
        let service = CountingService::new(Arc::new(StaticService::with_ids("inner", &["a"])));
        assert_eq!(service.name(), "inner");
        service.invoke(&input()).await.unwrap();
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_static_source_filters() {
        let source = StaticSource::new(vec![
            CandidateItem::new("a").with_attribute("kind", json!("book")),
            CandidateItem::new("b").with_attribute("kind", json!("film")),
        ]);
        let mut filters = BTreeMap::new();
        filters.insert("kind".to_string(), json!("film"));

        let found = source.fetch(&filters).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b");
    }

    #[tokio::test]
    async fn test_attribute_scorer() {
        let scorer = AttributeScorer::new("rating", 20.0);
        let ctx = ScoringContext {
            request_id: uuid::Uuid::nil(),
            query: None,
            previous_score: 0.0,
        };
        let rated = CandidateItem::new("a").with_attribute("rating", json!(4.5));
        assert_eq!(scorer.score(&rated, &ctx).await.unwrap().value, 90.0);
        assert!(scorer.score(&CandidateItem::new("b"), &ctx).await.is_err());
    }
}
