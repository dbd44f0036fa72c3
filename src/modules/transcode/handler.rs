use std::path::PathBuf;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::artifacts::{ArtifactNamer, ArtifactSet};
use super::encoder::{DashLayout, EncoderInvoker};
use super::error::{HandlerError, JobError, JobState};
use super::model::{JobId, Ladder};
use super::status::StatusCommitter;
use super::thumbnail::ThumbnailInvoker;
use super::workspace::{JobWorkspace, WorkspaceError};

/// One delivery of a job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub input_path: PathBuf,
    /// No redelivery follows this one, so a retryable failure is still recorded.
    pub final_attempt: bool,
}

impl JobRequest {
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            final_attempt: true,
        }
    }

    /// `attempt` counts from zero.
    pub fn attempt(input_path: impl Into<PathBuf>, attempt: u32, max_attempts: u32) -> Self {
        Self {
            input_path: input_path.into(),
            final_attempt: attempt.saturating_add(1) >= max_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    /// The path the job was delivered with.
    pub input_path: PathBuf,
    pub workspace: PathBuf,
    pub artifacts: ArtifactSet,
    pub thumbnail: PathBuf,
}

struct StepFailure {
    state: JobState,
    error: JobError,
}

impl From<WorkspaceError> for StepFailure {
    fn from(error: WorkspaceError) -> Self {
        Self {
            state: JobState::Workspacing,
            error: error.into(),
        }
    }
}

fn at<E: Into<JobError>>(state: JobState) -> impl FnOnce(E) -> StepFailure {
    move |error| StepFailure {
        state,
        error: error.into(),
    }
}

pub struct JobHandler<S> {
    store: S,
    encoder: EncoderInvoker,
    thumbnails: ThumbnailInvoker,
    workspaces: JobWorkspace,
    ladder: Ladder,
    layout: DashLayout,
}

impl<S: StatusCommitter> JobHandler<S> {
    pub fn new(store: S, encoder: EncoderInvoker, thumbnails: ThumbnailInvoker) -> Self {
        Self {
            store,
            encoder,
            thumbnails,
            workspaces: JobWorkspace::new(),
            ladder: Ladder::default(),
            layout: DashLayout::default(),
        }
    }

    pub fn with_ladder(mut self, ladder: Ladder) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn with_layout(mut self, layout: DashLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Run one job: workspace, encode, thumbnail, commit `complete`.
    ///
    /// The first failing step ends the job. `failed` is committed when the
    /// failure is not retryable or this is the final delivery. Cancellation
    /// kills the running process and commits nothing.
    pub async fn handle(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, HandlerError> {
        let artifacts = match ArtifactNamer::derive(&request.input_path, &self.ladder) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!(input = %request.input_path.display(), "❌ Rejecting job: {}", e);
                return Err(HandlerError {
                    job_id: None,
                    state: JobState::Received,
                    source: e.into(),
                    marked_failed: false,
                });
            }
        };

        let span = info_span!("job", job_id = %artifacts.job_id);
        self.process(request, artifacts, cancel).instrument(span).await
    }

    async fn process(
        &self,
        request: &JobRequest,
        artifacts: ArtifactSet,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, HandlerError> {
        let started = Instant::now();
        let job_id = artifacts.job_id.clone();
        info!(input = %request.input_path.display(), "📦 Job received");

        let result = self
            .workspaces
            .with_workspace(&request.input_path, &job_id, |workspace| async move {
                let job_id = workspace.job_id().clone();
                self.store
                    .mark_processing(&job_id)
                    .await
                    .map_err(at(JobState::Workspacing))?;

                let artifacts = self
                    .encoder
                    .encode(&workspace, &artifacts, &self.ladder, &self.layout, cancel)
                    .await
                    .map_err(at(JobState::Encoding))?;

                let thumbnail = self
                    .thumbnails
                    .extract_thumbnail(&workspace, &artifacts, cancel)
                    .await
                    .map_err(at(JobState::Thumbnailing))?;

                if cancel.is_cancelled() {
                    return Err(StepFailure {
                        state: JobState::Committing,
                        error: JobError::Cancelled,
                    });
                }
                self.store
                    .mark_complete(&job_id)
                    .await
                    .map_err(at(JobState::Committing))?;

                Ok(JobOutcome {
                    job_id,
                    input_path: request.input_path.clone(),
                    workspace: workspace.dir().to_path_buf(),
                    artifacts,
                    thumbnail,
                })
            })
            .await;

        match result {
            Ok(outcome) => {
                info!(
                    state = %JobState::Done,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "✅ Job complete"
                );
                Ok(outcome)
            }
            Err(StepFailure { state, error }) => {
                let marked_failed = self.record_failure(&job_id, request, state, &error).await;
                Err(HandlerError {
                    job_id: Some(job_id),
                    state,
                    source: error,
                    marked_failed,
                })
            }
        }
    }

    async fn record_failure(
        &self,
        job_id: &JobId,
        request: &JobRequest,
        state: JobState,
        error: &JobError,
    ) -> bool {
        if error.is_cancelled() {
            warn!(during = %state, "🛑 Job cancelled, status left as is");
            return false;
        }

        error!(during = %state, retryable = error.is_retryable(), "❌ Job failed: {}", error);

        if error.is_retryable() && !request.final_attempt {
            info!("Leaving job for redelivery");
            return false;
        }
        if !error.is_committable() {
            return false;
        }

        match self.store.mark_failed(job_id, &error.to_string()).await {
            Ok(()) => {
                info!(state = %JobState::Failed, "Job marked failed");
                true
            }
            Err(e) => {
                error!("Failed to record job failure: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_flags_last_delivery() {
        assert!(!JobRequest::attempt("a.mp4", 0, 3).final_attempt);
        assert!(!JobRequest::attempt("a.mp4", 1, 3).final_attempt);
        assert!(JobRequest::attempt("a.mp4", 2, 3).final_attempt);
        assert!(JobRequest::attempt("a.mp4", 7, 3).final_attempt);
        assert!(JobRequest::new("a.mp4").final_attempt);
    }
}
