//! # Rankflow
//!
//! A fault-tolerant, multi-stage ranking pipeline.
//!
//! A request flows through an ordered list of stages (typically discovery,
//! scoring and re-ranking), each bound to a named service. Rankflow keeps
//! the pipeline answering when those services misbehave:
//!
//! - **Health tracking**: an exponential moving average of success rate and
//!   latency per service
//! - **Circuit breaking**: failing services are short-circuited and probed
//!   again after a recovery timeout
//! - **Bounded execution**: per-stage timeouts and retries, capped by the
//!   request's overall deadline
//! - **Fallbacks**: required stages may name a backup service
//! - **Graceful degradation**: every request gets a result, with a
//!   confidence score and explanations of what went wrong
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rankflow::prelude::*;
//!
//! let pipeline = PipelineDefinitionBuilder::new("ranking")
//!     .stage(StageDefinition::new("discover", "catalog"))?
//!     .stage(StageDefinition::new("score", "scorer").with_fallback("backup-scorer"))?
//!     .stage(StageDefinition::new("rerank", "reranker").optional())?
//!     .build()?;
//!
//! let orchestrator = Orchestrator::builder()
//!     .service(catalog)
//!     .service(scorer)
//!     .service(backup_scorer)
//!     .service(reranker)
//!     .pipeline(pipeline)
//!     .build()?;
//!
//! let result = orchestrator.submit(request).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod breaker;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod health;
pub mod observability;
pub mod pipeline;
pub mod services;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::breaker::CircuitBreakerRegistry;
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        AssemblerConfig, BreakerConfig, ExecutorConfig, HealthConfig, RankflowConfig,
    };
    pub use crate::core::{
        CandidateItem, CircuitState, FailureReason, HealthStatus, OutcomeStatus, PipelineRequest,
        ProcessingResult, RankedItem, RequestPayload, RunStatus, ScoredItem, StageData,
        StageOutcome,
    };
    pub use crate::errors::{ConfigError, RankflowError, ServiceError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::health::HealthRegistry;
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{
        Orchestrator, OrchestratorBuilder, PipelineDefinition, PipelineDefinitionBuilder,
        StageDefinition,
    };
    pub use crate::services::{
        CandidateSource, DiscoveryService, FnService, PipelineService, Scorer, ScoringService,
        ServiceRegistry, StageInput,
    };
    pub use crate::utils::{iso_timestamp, Timestamp};
}
