//! Narrow contracts for the external systems rankflow consumes.

use crate::core::{clamp_score, clamp_unit, CandidateItem, ProcessingResult};
use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::info;
use uuid::Uuid;

/// Supplies the candidate pool. May be slow; always called inside a stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandidateSource: Send + Sync + Debug {
    /// Fetches candidates matching `filters`.
    async fn fetch(
        &self,
        filters: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Vec<CandidateItem>, ServiceError>;
}

/// A score from an opaque scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Value in `[0, 100]`.
    pub value: f64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Score {
    /// Creates a score, clamping both parts into range.
    #[must_use]
    pub fn new(value: f64, confidence: f64) -> Self {
        Self {
            value: clamp_score(value),
            confidence: clamp_unit(confidence),
        }
    }
}

/// Context handed to a scorer with each item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringContext {
    /// Request being served.
    pub request_id: Uuid,
    /// Free-text query from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Score the item carried into this stage.
    pub previous_score: f64,
}

/// Pluggable scoring or ranking model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scorer: Send + Sync + Debug {
    /// Scores one item.
    async fn score(&self, item: &CandidateItem, context: &ScoringContext) -> Result<Score, ServiceError>;
}

/// Receives finished results. Called fire-and-forget off the critical path.
#[async_trait]
pub trait PersistenceSink: Send + Sync + Debug {
    /// Stores a result.
    async fn persist(&self, result: &ProcessingResult) -> Result<(), ServiceError>;
}

/// Sends outbound notifications about a result.
///
/// Callers invoke this after `submit` returns; the pipeline never does.
#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    /// Notifies interested parties.
    async fn notify(&self, result: &ProcessingResult) -> Result<(), ServiceError>;
}

/// A notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, result: &ProcessingResult) -> Result<(), ServiceError> {
        info!(
            request_id = %result.request_id,
            items = result.items.len(),
            confidence = result.confidence,
            degraded = result.degraded,
            "Result ready"
        );
        Ok(())
    }
}
