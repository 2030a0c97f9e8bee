//! Pipeline definitions and execution.
//!
//! This module provides:
//! - Stage and pipeline definitions with a validating builder
//! - The per-run state machine
//! - The stage executor and fallback resolver
//! - Result assembly
//! - The orchestrator that ties them together

mod assembler;
mod builder;
mod executor;
mod fallback;
mod orchestrator;
mod run;
mod spec;


pub use assembler::{confidence, ResultAssembler, CONFIDENCE_FLOOR, FALLBACK_PENALTY};
pub use builder::PipelineDefinitionBuilder;
pub use executor::StageExecutor;
pub use fallback::FallbackResolver;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use run::{PipelineRun, RunMetrics};
pub use spec::{PipelineDefinition, StageDefinition};
