//! Error types for the rankflow crate.
//!
//! Runtime failures of individual services never surface as errors from
//! `submit`; they become [`FailureReason`](crate::core::FailureReason) values
//! on stage outcomes. The types here cover configuration mistakes caught at
//! startup and the narrow contracts between components.

use crate::core::RunStatus;
use std::time::Duration;
use thiserror::Error;

/// The main error type for rankflow operations.
#[derive(Debug, Error)]
pub enum RankflowError {
    /// Static configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A service call failed.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// A breaker rejected a call.
    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),

    /// A run was asked to move backwards or out of a terminal state.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransition),
}

/// Malformed static configuration. Raised at startup, never per request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A pipeline has no stages.
    #[error("Pipeline '{pipeline}' has no stages")]
    EmptyPipeline {
        /// Pipeline name.
        pipeline: String,
    },

    /// A name is empty or whitespace-only.
    #[error("{what} name cannot be empty or whitespace-only")]
    EmptyName {
        /// What was being named.
        what: &'static str,
    },

    /// Two stages share an id.
    #[error("Pipeline '{pipeline}' defines stage '{stage}' more than once")]
    DuplicateStage {
        /// Pipeline name.
        pipeline: String,
        /// Stage id.
        stage: String,
    },

    /// Two pipelines share a name.
    #[error("Pipeline '{pipeline}' is registered more than once")]
    DuplicatePipeline {
        /// Pipeline name.
        pipeline: String,
    },

    /// A stage or fallback points at a service nobody registered.
    #[error("Stage '{stage}' references unknown service '{service}'")]
    UnknownService {
        /// Stage id.
        stage: String,
        /// Service name.
        service: String,
    },

    /// The default pipeline is not registered.
    #[error("Default pipeline '{pipeline}' is not registered")]
    UnknownDefaultPipeline {
        /// Pipeline name.
        pipeline: String,
    },

    /// No pipeline was registered at all.
    #[error("Orchestrator has no pipelines")]
    NoPipelines,

    /// A stage's fallback is the stage's own target.
    #[error("Stage '{stage}' uses its own target '{service}' as fallback")]
    SelfFallback {
        /// Stage id.
        stage: String,
        /// Service name.
        service: String,
    },

    /// A stage timeout of zero.
    #[error("Stage '{stage}' has a zero timeout")]
    ZeroTimeout {
        /// Stage id.
        stage: String,
    },

    /// A numeric setting is outside its allowed range.
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        /// Setting name.
        field: &'static str,
        /// Human-readable allowed range.
        expected: &'static str,
        /// Offending value.
        value: String,
    },

    /// A configuration file could not be parsed.
    #[error("Invalid configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    pub(crate) fn out_of_range(
        field: &'static str,
        expected: &'static str,
        value: impl ToString,
    ) -> Self {
        Self::OutOfRange {
            field,
            expected,
            value: value.to_string(),
        }
    }
}

/// Error returned by a pipeline service or collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The service is temporarily unable to answer.
    #[error("Service '{service}' unavailable: {message}")]
    Unavailable {
        /// Service name.
        service: String,
        /// Detail.
        message: String,
    },

    /// The service rejected the input.
    #[error("Service '{service}' rejected input: {message}")]
    InvalidInput {
        /// Service name.
        service: String,
        /// Detail.
        message: String,
    },

    /// The service's own dependency timed out.
    #[error("Service '{service}' timed out after {elapsed:?}")]
    Timeout {
        /// Service name.
        service: String,
        /// Time waited.
        elapsed: Duration,
    },

    /// Anything else.
    #[error("Service '{service}' failed: {message}")]
    Internal {
        /// Service name.
        service: String,
        /// Detail.
        message: String,
    },
}

impl ServiceError {
    /// Creates an `Unavailable` error.
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates an `InvalidInput` error.
    pub fn invalid_input(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// A breaker rejected a call before invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker is open for {service}")]
pub struct CircuitOpenError {
    /// Service name.
    pub service: String,
}

/// A run status change that would violate monotonic progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid run transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Current status.
    pub from: RunStatus,
    /// Requested status.
    pub to: RunStatus,
}

/// Result alias for rankflow operations.
pub type Result<T, E = RankflowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::UnknownService {
            stage: "score".into(),
            service: "scorer".into(),
        };
        assert_eq!(err.to_string(), "Stage 'score' references unknown service 'scorer'");

        let err = ConfigError::out_of_range("health.alpha", "in (0, 1]", 1.5);
        assert_eq!(err.to_string(), "health.alpha must be in (0, 1], got 1.5");
    }

    #[test]
    fn test_service_error_display() {
        let err = ServiceError::unavailable("scorer", "connection refused");
        assert_eq!(err.to_string(), "Service 'scorer' unavailable: connection refused");
    }

    #[test]
    fn test_wrapping_into_rankflow_error() {
        let err: RankflowError = CircuitOpenError {
            service: "scorer".into(),
        }
        .into();
        assert!(matches!(err, RankflowError::CircuitOpen(_)));
        assert_eq!(err.to_string(), "Circuit breaker is open for scorer");

        let err: RankflowError = InvalidTransition {
            from: RunStatus::Completed,
            to: RunStatus::Running,
        }
        .into();
        assert_eq!(err.to_string(), "Invalid run transition completed -> running");

        let err: RankflowError = ConfigError::NoPipelines.into();
        assert!(matches!(err, RankflowError::Config(ConfigError::NoPipelines)));
    }
}
