//! Circuit breaking for backing services.
//!
//! Each service gets its own breaker; one service tripping never affects
//! another. Callers ask for a [`BreakerPermit`] before invoking a service
//! and settle it with the call's outcome.

mod registry;

pub use registry::{BreakerPermit, CircuitBreakerRegistry, CircuitBreakerState, ServiceBreaker};
