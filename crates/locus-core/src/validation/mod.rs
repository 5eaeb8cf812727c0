//! Validation orchestration.
//!
//! A job moves through `received -> parsed -> enriched -> scored -> persisted -> forwarded`,
//! or ends `failed`. Only persistence (after one retry), enqueue and job timeout failures end
//! a job as failed; everything else is recorded on the forwarded record.

pub mod errors;
pub mod parse;
pub mod processor;
pub mod rejection;
pub mod repository;

pub use errors::{EnqueueError, ParseError, PersistenceError, ValidationError};
pub use parse::parse_payload;
pub use processor::{fingerprint, JobState, ValidationDeps, ValidationProcessor, ValidationResult};
pub use rejection::RejectionTracker;
pub use repository::{
    InMemoryValidationRepository, SqliteValidationRepository, StoredValidation,
    ValidationRepository,
};
