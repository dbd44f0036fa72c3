use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::artifacts::ArtifactSet;
use super::filter::{ScalePad, VIDEO_FRAME};
use super::model::Ladder;
use super::process::{ExternalCommand, ProcessError};
use super::workspace::Workspace;

#[derive(Debug, Error)]
#[error("DASH encode failed: {0}")]
pub struct EncodeError(#[from] pub ProcessError);

/// Packaging options shared by every representation.
#[derive(Debug, Clone)]
pub struct DashLayout {
    pub scale_pad: ScalePad,
    pub segment_duration: u32,
    pub use_template: bool,
    pub use_timeline: bool,
    pub adaptation_sets: String,
}

impl Default for DashLayout {
    fn default() -> Self {
        Self {
            scale_pad: ScalePad::new(VIDEO_FRAME),
            segment_duration: 10,
            use_template: true,
            use_timeline: true,
            adaptation_sets: "id=0,streams=v".to_string(),
        }
    }
}

impl DashLayout {
    pub fn with_segment_duration(mut self, seconds: u32) -> Self {
        self.segment_duration = seconds;
        self
    }
}

fn flag(enabled: bool) -> &'static str {
    if enabled { "1" } else { "0" }
}

#[derive(Debug, Clone)]
pub struct EncoderInvoker {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl EncoderInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments for one multi-representation DASH encode.
    ///
    /// Output names are relative; the process runs inside the workspace.
    pub fn build_args(
        input: &Path,
        artifacts: &ArtifactSet,
        ladder: &Ladder,
        layout: &DashLayout,
    ) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-i",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.push(input.to_string_lossy().into_owned());
        args.push("-vf".to_string());
        args.push(layout.scale_pad.filter());

        for (i, rendition) in ladder.renditions().iter().enumerate() {
            args.extend([
                "-map".to_string(),
                "0:v".to_string(),
                format!("-b:v:{i}"),
                rendition.bitrate_arg(),
                format!("-s:v:{i}"),
                rendition.resolution.to_string(),
            ]);
        }

        args.extend([
            "-init_seg_name".to_string(),
            artifacts.init_segment_template.clone(),
            "-media_seg_name".to_string(),
            artifacts.media_segment_template.clone(),
            "-use_template".to_string(),
            flag(layout.use_template).to_string(),
            "-use_timeline".to_string(),
            flag(layout.use_timeline).to_string(),
            "-seg_duration".to_string(),
            layout.segment_duration.to_string(),
            "-adaptation_sets".to_string(),
            layout.adaptation_sets.clone(),
            "-f".to_string(),
            "dash".to_string(),
            artifacts.manifest.clone(),
        ]);

        args
    }

    pub fn command(
        &self,
        workspace: &Workspace,
        artifacts: &ArtifactSet,
        ladder: &Ladder,
        layout: &DashLayout,
    ) -> ExternalCommand {
        ExternalCommand::new(&self.program, workspace.dir()).args(Self::build_args(
            workspace.input(),
            artifacts,
            ladder,
            layout,
        ))
    }

    pub async fn encode(
        &self,
        workspace: &Workspace,
        artifacts: &ArtifactSet,
        ladder: &Ladder,
        layout: &DashLayout,
        cancel: &CancellationToken,
    ) -> Result<ArtifactSet, EncodeError> {
        let manifest = artifacts.manifest_path(workspace.dir());
        info!(
            representations = ladder.len(),
            manifest = %manifest.display(),
            "🎞️ Encoding DASH package"
        );

        self.command(workspace, artifacts, ladder, layout)
            .run_expecting(&manifest, cancel, self.timeout)
            .await?;

        Ok(artifacts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::transcode::artifacts::ArtifactNamer;
    use crate::modules::transcode::model::Rendition;

    fn positions<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
            .collect()
    }

    #[test]
    fn test_one_mapping_per_rendition_in_ladder_order() {
        let ladder = Ladder::new(vec![
            Rendition::new(1024, 1280, 720),
            Rendition::new(512, 640, 360),
            Rendition::new(768, 960, 540),
            Rendition::new(256, 426, 240),
        ])
        .unwrap();
        let artifacts = ArtifactNamer::derive(Path::new("/data/abc123.mp4"), &ladder).unwrap();
        let args = EncoderInvoker::build_args(
            Path::new("/data/abc123.mp4"),
            &artifacts,
            &ladder,
            &DashLayout::default(),
        );

        assert_eq!(positions(&args, "-map").len(), 4);
        for (i, rendition) in ladder.renditions().iter().enumerate() {
            assert_eq!(
                positions(&args, &format!("-b:v:{i}")),
                [rendition.bitrate_arg()]
            );
            assert_eq!(
                positions(&args, &format!("-s:v:{i}")),
                [rendition.resolution.to_string()]
            );
        }
        assert!(positions(&args, "-b:v:4").is_empty());
    }

    #[test]
    fn test_args_request_templated_dash_output() {
        let ladder = Ladder::default();
        let artifacts = ArtifactNamer::derive(Path::new("/data/abc123.mp4"), &ladder).unwrap();
        let args = EncoderInvoker::build_args(
            Path::new("/data/abc123.mp4"),
            &artifacts,
            &ladder,
            &DashLayout::default().with_segment_duration(4),
        );

        assert_eq!(&args[..6], ["-hide_banner", "-loglevel", "error", "-y", "-i", "/data/abc123.mp4"]);
        assert_eq!(positions(&args, "-vf"), [ScalePad::new(VIDEO_FRAME).filter()]);
        assert_eq!(positions(&args, "-init_seg_name"), ["init_abc123_$RepresentationID$.mp4"]);
        assert_eq!(positions(&args, "-media_seg_name"), ["chunk_abc123_$Bandwidth$_$Number$.m4s"]);
        assert_eq!(positions(&args, "-use_template"), ["1"]);
        assert_eq!(positions(&args, "-use_timeline"), ["1"]);
        assert_eq!(positions(&args, "-seg_duration"), ["4"]);
        assert_eq!(positions(&args, "-adaptation_sets"), ["id=0,streams=v"]);
        assert_eq!(positions(&args, "-f"), ["dash"]);
        assert_eq!(args.last().map(String::as_str), Some("abc123.mpd"));
        assert!(!args.iter().any(|arg| arg == "-report"));
    }

    #[test]
    fn test_same_job_builds_same_command() {
        let ladder = Ladder::default();
        let input = Path::new("/data/abc123.mp4");
        let build = || {
            let artifacts = ArtifactNamer::derive(input, &ladder).unwrap();
            EncoderInvoker::build_args(input, &artifacts, &ladder, &DashLayout::default())
        };
        assert_eq!(build(), build());
    }
}
