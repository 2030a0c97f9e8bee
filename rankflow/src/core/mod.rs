//! Core domain model types for rankflow.
//!
//! This module contains the value objects that cross the API boundary and
//! move between stages:
//! - Requests, payloads and candidate items
//! - Intermediate stage data
//! - Stage outcomes and the failure taxonomy
//! - Status enums for runs, stages, services and breakers
//! - The final processing result

mod data;
mod outcome;
mod request;
mod result;
mod status;

pub use data::{clamp_score, clamp_unit, ScoredItem, StageData, MAX_SCORE, MIN_SCORE};
pub use outcome::{FailureReason, StageOutcome};
pub use request::{CandidateItem, PipelineRequest, RequestPayload};
pub use result::{ProcessingResult, RankedItem, RunDiagnostics, StageSummary};
pub use status::{CircuitState, HealthStatus, OutcomeStatus, Priority, RunStatus};
