//! Observability utilities.
//!
//! Structured logs go through `tracing`; [`init_logging`] installs the
//! subscriber for binaries and tests that want output.

mod logging;

pub use logging::{init_logging, LogFormat, DEFAULT_FILTER, LOG_FORMAT_ENV};
