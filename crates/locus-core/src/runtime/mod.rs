//! Locus runtime initialization and lifecycle management.
//!
//! Wires configuration into the state store, job queue, repository, geocoding enricher and
//! validation processor, and owns the background tasks and shutdown channel shared with the
//! worker loops.
//!
//! # Examples
//!
//! ## Worker Usage
//!
//! ```no_run
//! use locus_core::{config::AppConfig, runtime::LocusRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!
//!     let runtime = LocusRuntime::builder().with_config(config).build().await?;
//!
//!     // Hand the processor and queue to worker tasks
//!     let processor = runtime.processor().clone();
//!     let queue = runtime.components().job_queue().clone();
//!
//!     // ... spawn workers that subscribe to runtime.shutdown_receiver() ...
//!
//!     runtime.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Embedded Usage (Tests, One-Off Validation)
//!
//! ```no_run
//! use locus_core::{config::AppConfig, queue::ExtractionJobResult, runtime::LocusRuntime};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = LocusRuntime::builder()
//!         .with_config(AppConfig::default())
//!         .disable_store_purge()
//!         .build()
//!         .await?;
//!
//!     let job = ExtractionJobResult::new("job-1", json!({"location": []}));
//!     let result = runtime.processor().process_job_result(job).await?;
//!     println!("forwarded as {}", result.merge_job_id);
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{LocusRuntimeBuilder, RuntimeError};
pub use components::LocusComponents;
pub use lifecycle::LocusRuntime;
