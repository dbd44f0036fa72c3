use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use super::model::{JobId, JobStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} does not exist in the status store")]
    UnknownJob(JobId),

    #[error("job {job_id} cannot move from {from} to {to}")]
    Transition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id} has unreadable status {status:?}")]
    Corrupt { job_id: JobId, status: String },

    #[error("status store unavailable: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Only store unavailability is worth a redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Forward-only status transitions keyed by job identity.
///
/// `transition` is a single conditional update: it applies only when the record
/// is currently in one of `next.predecessors()`. Repeating a transition whose
/// target is already the stored status succeeds without touching the record.
#[async_trait]
pub trait StatusCommitter: Send + Sync {
    async fn transition(
        &self,
        job_id: &JobId,
        next: JobStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn mark_processing(&self, job_id: &JobId) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Processing, None).await
    }

    async fn mark_complete(&self, job_id: &JobId) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Complete, None).await
    }

    async fn mark_failed(&self, job_id: &JobId, reason: &str) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Failed, Some(reason)).await
    }
}

#[async_trait]
impl<S: StatusCommitter + ?Sized> StatusCommitter for Arc<S> {
    async fn transition(
        &self,
        job_id: &JobId,
        next: JobStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        (**self).transition(job_id, next, reason).await
    }
}

/// Decide what a conditional update does given the record's current status.
/// `Ok(true)` means write, `Ok(false)` means the target is already stored.
pub fn check_transition(
    job_id: &JobId,
    current: JobStatus,
    next: JobStatus,
) -> Result<bool, StoreError> {
    if current == next {
        return Ok(false);
    }
    if current.can_transition_to(next) {
        return Ok(true);
    }
    Err(StoreError::Transition {
        job_id: job_id.clone(),
        from: current,
        to: next,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStatus {
    pub status: JobStatus,
    pub failure_reason: Option<String>,
    /// Number of updates that actually changed the record.
    pub writes: u32,
}

/// Status store kept in memory, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    records: Arc<Mutex<HashMap<JobId, StoredStatus>>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job the way ingest would before enqueueing it.
    pub async fn insert_pending(&self, job_id: JobId) {
        self.records.lock().await.insert(
            job_id,
            StoredStatus {
                status: JobStatus::Pending,
                failure_reason: None,
                writes: 0,
            },
        );
    }

    pub async fn get(&self, job_id: &JobId) -> Option<StoredStatus> {
        self.records.lock().await.get(job_id).cloned()
    }

    pub async fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.get(job_id).await.map(|record| record.status)
    }
}

#[async_trait]
impl StatusCommitter for MemoryStatusStore {
    async fn transition(
        &self,
        job_id: &JobId,
        next: JobStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| StoreError::UnknownJob(job_id.clone()))?;

        if check_transition(job_id, record.status, next)? {
            record.status = next;
            record.failure_reason = reason.map(str::to_string);
            record.writes += 1;
        }
        Ok(())
    }
}
