use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::artifacts::ArtifactSet;
use super::filter::{ScalePad, THUMBNAIL_FRAME};
use super::process::{ExternalCommand, ProcessError};
use super::workspace::Workspace;

#[derive(Debug, Error)]
#[error("thumbnail extraction failed: {0}")]
pub struct ThumbnailError(#[from] pub ProcessError);

#[derive(Debug, Clone)]
pub struct ThumbnailInvoker {
    program: PathBuf,
    scale_pad: ScalePad,
    timeout: Option<Duration>,
}

impl ThumbnailInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            scale_pad: ScalePad::new(THUMBNAIL_FRAME),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build_args(input: &Path, output: &str, scale_pad: &ScalePad) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vf".to_string(),
            scale_pad.filter(),
            "-vframes".to_string(),
            "1".to_string(),
            output.to_string(),
        ]
    }

    /// Grab the first frame into `thumbnail_{job_id}.jpg` and return its absolute path.
    pub async fn extract_thumbnail(
        &self,
        workspace: &Workspace,
        artifacts: &ArtifactSet,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ThumbnailError> {
        let output = artifacts.thumbnail_path(workspace.dir());
        info!(thumbnail = %output.display(), "🖼️ Extracting thumbnail");

        ExternalCommand::new(&self.program, workspace.dir())
            .args(Self::build_args(
                workspace.input(),
                &artifacts.thumbnail,
                &self.scale_pad,
            ))
            .run_expecting(&output, cancel, self.timeout)
            .await?;

        Ok(output)
    }
}
