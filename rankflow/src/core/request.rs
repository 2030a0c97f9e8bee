//! Inbound request and candidate types.

use super::Priority;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// The domain payload of a request: filters for the candidate source plus
/// an optional free-text query handed to scorers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Filters passed to the candidate source.
    #[serde(default)]
    pub filters: BTreeMap<String, serde_json::Value>,
    /// Free-text query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl RequestPayload {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter.
    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    /// Sets the query.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// A request submitted to the orchestrator.
///
/// Built once through the `with_*` methods and then shared read-only with
/// every stage of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Unique request id.
    pub id: Uuid,
    /// Who asked.
    pub requester_id: String,
    /// Request priority.
    #[serde(default)]
    pub priority: Priority,
    /// Absolute deadline for the whole run.
    pub deadline: Timestamp,
    /// Filters and query.
    #[serde(default)]
    pub payload: RequestPayload,
    /// Registered pipeline to run; the orchestrator default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_type: Option<String>,
}

impl PipelineRequest {
    /// Creates a request with an absolute deadline.
    #[must_use]
    pub fn new(requester_id: impl Into<String>, deadline: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id: requester_id.into(),
            priority: Priority::default(),
            deadline,
            payload: RequestPayload::default(),
            pipeline_type: None,
        }
    }

    /// Creates a request whose deadline is `budget` from now.
    #[must_use]
    pub fn with_budget(requester_id: impl Into<String>, budget: Duration) -> Self {
        let budget = chrono::Duration::from_std(budget).unwrap_or(chrono::Duration::MAX);
        let deadline = now_utc()
            .checked_add_signed(budget)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
        Self::new(requester_id, deadline)
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: RequestPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Selects a registered pipeline type.
    #[must_use]
    pub fn with_pipeline_type(mut self, pipeline_type: impl Into<String>) -> Self {
        self.pipeline_type = Some(pipeline_type.into());
        self
    }

    /// Time left until the deadline, zero if it already passed.
    #[must_use]
    pub fn remaining_budget(&self) -> Duration {
        (self.deadline - now_utc()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// A candidate item as returned by the candidate source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Item id.
    pub id: String,
    /// Arbitrary attributes scorers may read.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl CandidateItem {
    /// Creates an item with no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Reads a numeric attribute.
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(serde_json::Value::as_f64)
    }
}
