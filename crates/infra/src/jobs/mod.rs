//! Import jobs: the record, its store, and the background worker.
//!
//! ## Components
//!
//! - `ImportJob`: one CSV import run and its progress counters
//! - `JobStore`: persistence with atomic, snapshot-returning transitions
//! - `ImportWorker`: runs imports off the request path, bounded by a semaphore

pub mod store;
pub mod types;
pub mod worker;

pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{ImportJob, JobStatus};
pub use worker::{ImportSummary, ImportWorker, ImportWorkerConfig};
