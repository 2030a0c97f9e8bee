//! Testing utilities for rankflow pipelines.
//!
//! This module provides:
//! - Stub services and collaborators
//! - Sample candidates and the standard ranking pipeline
//! - Assertions over processing results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_confidence, assert_explained, assert_ranked, assert_stage};
pub use fixtures::{
    names, ranking_pipeline, ranking_pipeline_with, ranking_services, sample_candidates,
    sample_request,
};
pub use mocks::{
    AttributeScorer, CountingService, FailingService, ScriptedService, SlowService, StaticService,
    StaticSource, Step,
};
