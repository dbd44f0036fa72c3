use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::model::{JobId, JobRecord, JobStatus};
use super::status::{check_transition, StatusCommitter, StoreError};

pub struct JobRepository;

impl JobRepository {
    pub async fn find_by_id(pool: &PgPool, id: &JobId) -> Result<Option<JobRecord>, sqlx::Error> {
        sqlx::query_as::<_, JobRecord>(
            "SELECT id, input_path, status, failure_reason, created_at, updated_at FROM videos WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
    }

    /// Single-row conditional update. Returns the number of rows changed.
    pub async fn update_status_from(
        pool: &PgPool,
        id: &JobId,
        next: JobStatus,
        reason: Option<&str>,
        allowed: &[JobStatus],
    ) -> Result<u64, sqlx::Error> {
        let allowed: Vec<String> = allowed.iter().map(|s| s.as_str().to_string()).collect();

        let result = sqlx::query(
            r#"
            UPDATE videos
            SET status = $2, failure_reason = $3, updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(id.as_str())
        .bind(next.as_str())
        .bind(reason)
        .bind(allowed)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgStatusCommitter {
    pool: PgPool,
}

impl PgStatusCommitter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// What a conditional update that changed no rows means, given the row read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unchanged {
    /// The record already holds the target status.
    AlreadySet,
    /// The record now allows the transition; it moved after the update ran.
    Moved(JobStatus),
}

pub fn resolve_unchanged(
    job_id: &JobId,
    next: JobStatus,
    stored: Option<&str>,
) -> Result<Unchanged, StoreError> {
    let stored = stored.ok_or_else(|| StoreError::UnknownJob(job_id.clone()))?;
    let current: JobStatus = stored.parse().map_err(|_| StoreError::Corrupt {
        job_id: job_id.clone(),
        status: stored.to_string(),
    })?;

    if check_transition(job_id, current, next)? {
        Ok(Unchanged::Moved(current))
    } else {
        Ok(Unchanged::AlreadySet)
    }
}

#[async_trait]
impl StatusCommitter for PgStatusCommitter {
    async fn transition(
        &self,
        job_id: &JobId,
        next: JobStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut current = next;
        // A second pass only happens if the row moved between the update and the read.
        for _ in 0..2 {
            let changed = JobRepository::update_status_from(
                &self.pool,
                job_id,
                next,
                reason,
                next.predecessors(),
            )
            .await?;
            if changed > 0 {
                debug!(job_id = %job_id, status = %next, "Status updated");
                return Ok(());
            }

            let record = JobRepository::find_by_id(&self.pool, job_id).await?;
            match resolve_unchanged(job_id, next, record.as_ref().map(|r| r.status.as_str()))? {
                Unchanged::AlreadySet => {
                    debug!(job_id = %job_id, status = %next, "Status already set, nothing to do");
                    return Ok(());
                }
                Unchanged::Moved(status) => current = status,
            }
        }

        Err(StoreError::Transition {
            job_id: job_id.clone(),
            from: current,
            to: next,
        })
    }
}
