//! Per-service health tracking.
//!
//! The registry keeps an exponential moving average of latency and error
//! rate for every service a stage has called, and a periodic sweep flags
//! services that stopped answering altogether.

mod registry;

pub use registry::{HealthRegistry, ServiceHealth};
