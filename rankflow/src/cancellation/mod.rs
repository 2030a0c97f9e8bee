//! Cancellation and background task management.
//!
//! - [`CancellationToken`] lets callers abandon a run or stop a loop
//! - [`Scheduler`] runs periodic maintenance tasks until shut down

mod scheduler;
mod token;

pub use scheduler::Scheduler;
pub use token::CancellationToken;
