//! Intermediate payload carried from one stage to the next.

use super::CandidateItem;
use serde::{Deserialize, Serialize};

/// Lower bound of a score.
pub const MIN_SCORE: f64 = 0.0;
/// Upper bound of a score.
pub const MAX_SCORE: f64 = 100.0;

/// A candidate with the score accumulated so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    /// The candidate.
    pub item: CandidateItem,
    /// Score in `[0, 100]`.
    pub score: f64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Short human-readable reasons attached by stages.
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl ScoredItem {
    /// Wraps an unscored candidate.
    #[must_use]
    pub fn unscored(item: CandidateItem) -> Self {
        Self {
            item,
            score: MIN_SCORE,
            confidence: 0.0,
            reasons: Vec::new(),
        }
    }

    /// Sets the score and confidence, clamped to their ranges.
    #[must_use]
    pub fn with_score(mut self, score: f64, confidence: f64) -> Self {
        self.score = clamp_score(score);
        self.confidence = clamp_unit(confidence);
        self
    }

    /// Appends a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// Returns the item id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.item.id
    }
}

/// Output of a stage and input of the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageData {
    /// Items in the order the producing stage emitted them.
    pub items: Vec<ScoredItem>,
    /// Self-reported quality of the output in `[0, 1]`, if the service knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
}

impl StageData {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a payload from items.
    #[must_use]
    pub fn from_items(items: Vec<ScoredItem>) -> Self {
        Self {
            items,
            quality: None,
        }
    }

    /// Sets the quality, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(clamp_unit(quality));
        self
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Clamps a score to `[0, 100]`; NaN becomes 0.
#[must_use]
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        MIN_SCORE
    } else {
        value.clamp(MIN_SCORE, MAX_SCORE)
    }
}

/// Clamps a value to `[0, 1]`; NaN becomes 0.
#[must_use]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_are_clamped() {
        let item = ScoredItem::unscored(CandidateItem::new("a")).with_score(140.0, -0.5);
        assert_eq!(item.score, 100.0);
        assert_eq!(item.confidence, 0.0);

        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
    }
}
