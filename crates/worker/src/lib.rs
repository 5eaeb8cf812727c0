//! Worker pool for the Locus validation stage.
//!
//! Workers drain the validation queue independently; all shared state (circuit breakers,
//! cache, queue claims) lives in the runtime's backends.

pub mod pool;

pub use pool::{PollOutcome, WorkerPool};
