use std::fmt;

use thiserror::Error;

use super::encoder::EncodeError;
use super::model::{InvalidIdentity, JobId};
use super::status::StoreError;
use super::thumbnail::ThumbnailError;
use super::workspace::WorkspaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Workspacing,
    Encoding,
    Thumbnailing,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Received => "received",
            JobState::Workspacing => "workspacing",
            JobState::Encoding => "encoding",
            JobState::Thumbnailing => "thumbnailing",
            JobState::Committing => "committing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    InvalidIdentity(#[from] InvalidIdentity),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::InvalidIdentity(_) => false,
            JobError::Workspace(e) => e.is_retryable(),
            JobError::Encode(_) | JobError::Thumbnail(_) => true,
            JobError::Store(e) => e.is_retryable(),
            JobError::Cancelled => true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            JobError::Cancelled => true,
            JobError::Encode(EncodeError(e)) | JobError::Thumbnail(ThumbnailError(e)) => {
                e.is_cancelled()
            }
            _ => false,
        }
    }

    /// Whether this failure may be written to the job's record. Not when the
    /// record is missing, already terminal, or held by another invocation.
    pub fn is_committable(&self) -> bool {
        !matches!(
            self,
            JobError::InvalidIdentity(_)
                | JobError::Cancelled
                | JobError::Workspace(WorkspaceError::Busy(_))
                | JobError::Store(
                    StoreError::UnknownJob(_)
                        | StoreError::Transition { .. }
                        | StoreError::Corrupt { .. }
                )
        )
    }
}

/// What the broker sees when a job does not reach `Done`.
#[derive(Debug, Error)]
#[error("job failed while {state}: {source}")]
pub struct HandlerError {
    /// Absent when the identity could not be derived.
    pub job_id: Option<JobId>,
    pub state: JobState,
    #[source]
    pub source: JobError,
    /// Whether `failed` was written to the status store.
    pub marked_failed: bool,
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        !self.marked_failed && self.source.is_retryable()
    }

    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}
