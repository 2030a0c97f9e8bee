//! Assertions over processing results.

use crate::core::{OutcomeStatus, ProcessingResult};

/// Asserts items are in non-increasing score order with ranks 1..=n.
pub fn assert_ranked(result: &ProcessingResult) {
    for (index, item) in result.items.iter().enumerate() {
        assert_eq!(
            item.rank,
            index + 1,
            "Expected rank {} for '{}', got {}",
            index + 1,
            item.item_id,
            item.rank
        );
    }
    for pair in result.items.windows(2) {
        assert!(
            pair[0].score >= pair[1].score,
            "Items out of order: '{}' ({}) before '{}' ({})",
            pair[0].item_id,
            pair[0].score,
            pair[1].item_id,
            pair[1].score
        );
    }
}

/// Asserts the confidence equals `expected` within 1e-9.
pub fn assert_confidence(result: &ProcessingResult, expected: f64) {
    assert!(
        (result.confidence - expected).abs() < 1e-9,
        "Expected confidence {expected}, got {}",
        result.confidence
    );
}

/// Asserts a stage ended with `status` and, if given, failure `code`.
pub fn assert_stage(result: &ProcessingResult, stage_id: &str, status: OutcomeStatus, code: Option<&str>) {
    let Some(stage) = result.diagnostics.stages.iter().find(|s| s.stage_id == stage_id) else {
        panic!(
            "No stage '{stage_id}' in diagnostics: {:?}",
            result.diagnostics.stages.iter().map(|s| &s.stage_id).collect::<Vec<_>>()
        );
    };
    assert_eq!(stage.status, status, "Unexpected status for stage '{stage_id}'");
    if let Some(code) = code {
        let reason = stage.reason.as_deref().unwrap_or_default();
        assert!(
            reason.starts_with(code),
            "Expected stage '{stage_id}' reason to start with '{code}', got '{reason}'"
        );
    }
}

/// Asserts some explanation contains `needle`.
pub fn assert_explained(result: &ProcessingResult, needle: &str) {
    assert!(
        result.explanations.iter().any(|e| e.contains(needle)),
        "No explanation mentions '{needle}': {:?}",
        result.explanations
    );
}
