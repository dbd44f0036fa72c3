//! Job-local output directories.
//!
//! The process-wide working directory is never changed. Each external command
//! receives the workspace as its own working directory and the input as an
//! absolute path.

use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

use super::model::JobId;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("input {} not found", .0.display())]
    InputNotFound(PathBuf),

    #[error("input {} has no parent directory", .0.display())]
    NoParent(PathBuf),

    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("workspace {} is not writable: {source}", .path.display())]
    NotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("job {0} is already being handled by this worker")]
    Busy(JobId),

    #[error("failed to resolve {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WorkspaceError {
    /// Mount and permission problems may clear up on redelivery; a path that is
    /// structurally wrong will not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            WorkspaceError::NoParent(_) | WorkspaceError::NotADirectory(_)
        )
    }
}

/// Hands out workspaces and remembers which jobs currently hold one.
#[derive(Debug, Clone, Default)]
pub struct JobWorkspace {
    active: Arc<Mutex<HashSet<JobId>>>,
}

/// An acquired workspace. Dropping it releases the job's lease.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    input: PathBuf,
    job_id: JobId,
    _lease: Lease,
}

impl Workspace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute input path. Symlinks are kept, so the workspace is the
    /// directory the upload was delivered in.
    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

#[derive(Debug)]
struct Lease {
    active: Arc<Mutex<HashSet<JobId>>>,
    job_id: JobId,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
        debug!(job_id = %self.job_id, "Workspace released");
    }
}

impl JobWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, job_id: &JobId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
    }

    pub async fn acquire(&self, input_path: &Path, job_id: &JobId) -> Result<Workspace, WorkspaceError> {
        let io_error = |source: io::Error| WorkspaceError::Io {
            path: input_path.to_path_buf(),
            source,
        };
        let input = std::path::absolute(input_path).map_err(io_error)?;
        tokio::fs::metadata(&input)
            .await
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => WorkspaceError::InputNotFound(input_path.to_path_buf()),
                _ => io_error(source),
            })?;

        let dir = input
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| WorkspaceError::NoParent(input.clone()))?;

        let metadata = tokio::fs::metadata(&dir).await.map_err(|source| WorkspaceError::Io {
            path: dir.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(WorkspaceError::NotADirectory(dir));
        }
        if metadata.permissions().readonly() {
            return Err(WorkspaceError::NotWritable {
                path: dir,
                source: io::Error::new(io::ErrorKind::PermissionDenied, "directory is read-only"),
            });
        }

        let lease = self.lease(job_id)?;
        probe_writable(&dir, job_id).await?;

        debug!(job_id = %job_id, dir = %dir.display(), "Workspace acquired");
        Ok(Workspace {
            dir,
            input,
            job_id: job_id.clone(),
            _lease: lease,
        })
    }

    /// Acquire the workspace for `input_path`, run `body` in it, release it.
    ///
    /// The lease is released however `body` ends, including when the returned
    /// future is dropped mid-flight.
    pub async fn with_workspace<F, Fut, T, E>(
        &self,
        input_path: &Path,
        job_id: &JobId,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Workspace) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<WorkspaceError>,
    {
        let workspace = self.acquire(input_path, job_id).await?;
        body(workspace).await
    }

    fn lease(&self, job_id: &JobId) -> Result<Lease, WorkspaceError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(job_id.clone()) {
            return Err(WorkspaceError::Busy(job_id.clone()));
        }
        Ok(Lease {
            active: Arc::clone(&self.active),
            job_id: job_id.clone(),
        })
    }
}

async fn probe_writable(dir: &Path, job_id: &JobId) -> Result<(), WorkspaceError> {
    let probe = dir.join(format!(".{job_id}.probe"));
    let not_writable = |source| WorkspaceError::NotWritable {
        path: dir.to_path_buf(),
        source,
    };

    tokio::fs::write(&probe, b"").await.map_err(not_writable)?;
    tokio::fs::remove_file(&probe).await.map_err(not_writable)?;
    Ok(())
}
