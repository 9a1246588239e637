//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use bulkimport_core::{DomainError, DomainResult, JobId};

use super::types::ImportJob;

/// Job store abstraction.
///
/// Every mutation is applied atomically against the stored record and
/// returns the resulting snapshot, so concurrent readers never observe a
/// half-applied update.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a freshly created job.
    async fn insert(&self, job: ImportJob) -> Result<ImportJob, JobStoreError>;

    async fn get(&self, id: JobId) -> Result<Option<ImportJob>, JobStoreError>;

    async fn start(&self, id: JobId) -> Result<ImportJob, JobStoreError>;

    async fn set_total_rows(&self, id: JobId, total: u64) -> Result<ImportJob, JobStoreError>;

    /// Move `processed_rows` forward to `processed`.
    async fn advance(&self, id: JobId, processed: u64) -> Result<ImportJob, JobStoreError>;

    async fn complete(&self, id: JobId) -> Result<ImportJob, JobStoreError>;

    async fn fail(&self, id: JobId, message: &str) -> Result<ImportJob, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    /// The requested transition is not allowed from the current state.
    #[error(transparent)]
    Transition(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, ImportJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn mutate<F>(&self, id: JobId, apply: F) -> Result<ImportJob, JobStoreError>
    where
        F: FnOnce(&mut ImportJob) -> DomainResult<()>,
    {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))?;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        apply(job)?;
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: ImportJob) -> Result<ImportJob, JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<ImportJob>, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))?;
        Ok(jobs.get(&id).cloned())
    }

    async fn start(&self, id: JobId) -> Result<ImportJob, JobStoreError> {
        self.mutate(id, ImportJob::start)
    }

    async fn set_total_rows(&self, id: JobId, total: u64) -> Result<ImportJob, JobStoreError> {
        self.mutate(id, |job| job.set_total_rows(total))
    }

    async fn advance(&self, id: JobId, processed: u64) -> Result<ImportJob, JobStoreError> {
        self.mutate(id, |job| job.advance_to(processed))
    }

    async fn complete(&self, id: JobId) -> Result<ImportJob, JobStoreError> {
        self.mutate(id, ImportJob::complete)
    }

    async fn fail(&self, id: JobId, message: &str) -> Result<ImportJob, JobStoreError> {
        self.mutate(id, |job| job.fail(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobStatus;

    fn queued() -> ImportJob {
        ImportJob::new(JobId::new(), "a.csv", "/tmp/a.csv")
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = InMemoryJobStore::new();
        let job = store.insert(queued()).await.unwrap();

        let loaded = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(store.get(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = store.insert(queued()).await.unwrap();
        let err = store.insert(job.clone()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::AlreadyExists(id) if id == job.id));
    }

    #[tokio::test]
    async fn mutations_return_snapshots() {
        let store = InMemoryJobStore::new();
        let id = store.insert(queued()).await.unwrap().id;

        assert_eq!(store.start(id).await.unwrap().status, JobStatus::Processing);
        assert_eq!(store.set_total_rows(id, 2).await.unwrap().total_rows, Some(2));
        assert_eq!(store.advance(id, 2).await.unwrap().processed_rows, 2);
        assert_eq!(store.complete(id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn rejected_transition_keeps_stored_state() {
        let store = InMemoryJobStore::new();
        let id = store.insert(queued()).await.unwrap().id;
        store.start(id).await.unwrap();
        store.fail(id, "bad header").await.unwrap();

        let err = store.complete(id).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Transition(_)));

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("bad header"));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        assert!(matches!(store.start(id).await, Err(JobStoreError::NotFound(x)) if x == id));
    }
}
