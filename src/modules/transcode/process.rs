//! Runner for the external encoder/packager processes.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest stderr tail kept in an error.
const DIAGNOSTIC_LIMIT: usize = 4096;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} exited successfully but {} is missing", .path.display())]
    MissingOutput {
        program: String,
        path: PathBuf,
        stderr: String,
    },

    #[error("{program} timed out after {} seconds", .limit.as_secs())]
    Timeout { program: String, limit: Duration },

    #[error("{program} was cancelled")]
    Cancelled { program: String },
}

impl ProcessError {
    /// Diagnostic output captured from the process, if it ran.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            ProcessError::Failed { stderr, .. } | ProcessError::MissingOutput { stderr, .. } => {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

/// One invocation of an external program, run with its own working directory.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: PathBuf,
    args: Vec<String>,
    cwd: PathBuf,
}

impl ExternalCommand {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Run to completion, killing the child if `cancel` fires or `timeout` elapses.
    ///
    /// A non-zero exit is returned as [`ProcessError::Failed`] with the stderr tail.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError> {
        let program = self.program_name();
        debug!("Running {} {} (in {})", program, self.args.join(" "), self.cwd.display());

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stderr = child.stderr.take();
        let collector = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let waited = tokio::select! {
            result = wait_with_limit(&mut child, timeout) => result,
            _ = cancel.cancelled() => Err(WaitFailure::Cancelled),
        };

        let status = match waited {
            Ok(status) => status,
            Err(failure) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", program, e);
                }
                collector.abort();
                return Err(match failure {
                    WaitFailure::Io(source) => ProcessError::Wait { program, source },
                    WaitFailure::Timeout(limit) => ProcessError::Timeout { program, limit },
                    WaitFailure::Cancelled => ProcessError::Cancelled { program },
                });
            }
        };

        let stderr = collector
            .await
            .map(|buf| tail(&String::from_utf8_lossy(&buf)))
            .unwrap_or_default();

        if !status.success() {
            return Err(ProcessError::Failed {
                program,
                code: status.code(),
                stderr,
            });
        }

        Ok(ProcessOutput { status, stderr })
    }

    /// [`ExternalCommand::run`], then require `expected` to exist.
    pub async fn run_expecting(
        &self,
        expected: &Path,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError> {
        let output = self.run(cancel, timeout).await?;
        let exists = tokio::fs::try_exists(expected).await.unwrap_or(false);
        if !exists {
            return Err(ProcessError::MissingOutput {
                program: self.program_name(),
                path: expected.to_path_buf(),
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

enum WaitFailure {
    Io(std::io::Error),
    Timeout(Duration),
    Cancelled,
}

async fn wait_with_limit(
    child: &mut tokio::process::Child,
    timeout: Option<Duration>,
) -> Result<ExitStatus, WaitFailure> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(result) => result.map_err(WaitFailure::Io),
            Err(_) => Err(WaitFailure::Timeout(limit)),
        },
        None => child.wait().await.map_err(WaitFailure::Io),
    }
}

fn tail(text: &str) -> String {
    let text = text.trim();
    if text.len() <= DIAGNOSTIC_LIMIT {
        return text.to_string();
    }
    let mut start = text.len() - DIAGNOSTIC_LIMIT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, cwd: &Path) -> ExternalCommand {
        ExternalCommand::new("/bin/sh", cwd).args(["-c", script])
    }

    #[tokio::test]
    async fn test_success_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let output = sh("echo warming up >&2", dir.path())
            .run(&CancellationToken::new(), None)
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stderr, "warming up");
    }

    #[tokio::test]
    async fn test_runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        sh("touch here.txt", dir.path())
            .run_expecting(&dir.path().join("here.txt"), &CancellationToken::new(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let err = sh("echo 'moov atom not found' >&2; exit 3", dir.path())
            .run(&CancellationToken::new(), None)
            .await
            .unwrap_err();

        match &err {
            ProcessError::Failed { code, .. } => assert_eq!(*code, Some(3)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.diagnostics(), Some("moov atom not found"));
    }

    #[tokio::test]
    async fn test_missing_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = sh("true", dir.path())
            .run_expecting(&dir.path().join("out.mpd"), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::MissingOutput { .. }));
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = sh("exec sleep 30", dir.path())
            .run(&cancel, None)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let err = sh("exec sleep 30", dir.path())
            .run(&CancellationToken::new(), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExternalCommand::new("/nonexistent/ffmpeg", dir.path())
            .run(&CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn test_tail_keeps_end_of_long_output() {
        let long = format!("{}END", "x".repeat(DIAGNOSTIC_LIMIT * 2));
        let kept = tail(&long);
        assert_eq!(kept.len(), DIAGNOSTIC_LIMIT);
        assert!(kept.ends_with("END"));
    }
}
