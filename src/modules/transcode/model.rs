use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;

const MAX_JOB_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job identity {token:?}: {reason}")]
pub struct InvalidIdentity {
    pub token: String,
    pub reason: &'static str,
}

/// Identity of a job, taken from the base name of its input file.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted so the id can be embedded
/// in encoder segment templates and file names without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn parse(token: &str) -> Result<Self, InvalidIdentity> {
        let reject = |reason| InvalidIdentity {
            token: token.to_string(),
            reason,
        };

        if token.is_empty() {
            return Err(reject("empty"));
        }
        if token.len() > MAX_JOB_ID_LEN {
            return Err(reject("longer than 64 characters"));
        }
        if !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(reject("only ASCII letters, digits, '-' and '_' are allowed"));
        }

        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = InvalidIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = InvalidIdentity;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    /// States a record may be in for a conditional update to `self` to apply.
    /// A repeat of the current state is not listed; stores treat it as a no-op.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Processing => &[JobStatus::Pending],
            JobStatus::Complete => &[JobStatus::Processing],
            JobStatus::Failed => &[JobStatus::Pending, JobStatus::Processing],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status {other:?}")),
        }
    }
}

/// Row of the `videos` table as written by ingest.
#[derive(Debug, Clone, FromRow)]
pub struct JobRecord {
    pub id: String,
    pub input_path: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = LadderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || LadderError::Resolution(s.to_string());
        let (w, h) = s.split_once('x').ok_or_else(bad)?;
        let width: u32 = w.trim().parse().map_err(|_| bad())?;
        let height: u32 = h.trim().parse().map_err(|_| bad())?;
        if width == 0 || height == 0 {
            return Err(bad());
        }
        Ok(Self { width, height })
    }
}

/// One representation of the output: target bitrate and frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub bitrate_kbps: u32,
    pub resolution: Resolution,
}

impl Rendition {
    pub const fn new(bitrate_kbps: u32, width: u32, height: u32) -> Self {
        Self {
            bitrate_kbps,
            resolution: Resolution::new(width, height),
        }
    }

    /// Bitrate as passed to `-b:v:N`, e.g. `512k`.
    pub fn bitrate_arg(&self) -> String {
        format!("{}k", self.bitrate_kbps)
    }

    /// Bandwidth in bits per second, the value the packager substitutes for `$Bandwidth$`.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.bitrate_kbps) * 1000
    }
}

impl fmt::Display for Rendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}k@{}", self.bitrate_kbps, self.resolution)
    }
}

impl FromStr for Rendition {
    type Err = LadderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bitrate, resolution) = s
            .trim()
            .split_once('@')
            .ok_or_else(|| LadderError::Entry(s.to_string()))?;

        let digits = bitrate.trim().trim_end_matches(['k', 'K']);
        let bitrate_kbps: u32 = digits
            .parse()
            .map_err(|_| LadderError::Bitrate(bitrate.to_string()))?;
        if bitrate_kbps == 0 {
            return Err(LadderError::Bitrate(bitrate.to_string()));
        }

        Ok(Self {
            bitrate_kbps,
            resolution: resolution.parse()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    #[error("ladder must contain at least one rendition")]
    Empty,

    #[error("expected BITRATE@WIDTHxHEIGHT, got {0:?}")]
    Entry(String),

    #[error("invalid bitrate {0:?}")]
    Bitrate(String),

    #[error("invalid resolution {0:?}")]
    Resolution(String),
}

/// Ordered, non-empty list of renditions. Entry `i` is representation `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ladder(Vec<Rendition>);

impl Ladder {
    pub fn new(renditions: Vec<Rendition>) -> Result<Self, LadderError> {
        if renditions.is_empty() {
            return Err(LadderError::Empty);
        }
        Ok(Self(renditions))
    }

    pub fn renditions(&self) -> &[Rendition] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Ladder {
    fn default() -> Self {
        Self(vec![
            Rendition::new(512, 640, 360),
            Rendition::new(768, 960, 540),
            Rendition::new(1024, 1280, 720),
        ])
    }
}

impl FromStr for Ladder {
    type Err = LadderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let renditions = s
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Rendition>, _>>()?;
        Self::new(renditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_accepts_object_ids_and_short_tokens() {
        assert!(JobId::parse("6728f0dd8289003926090026").is_ok());
        assert!(JobId::parse("abc123").is_ok());
        assert!(JobId::parse("6f1c0b6e-3c1d-4c59-9a51-0b7d3c2a9e11").is_ok());
    }

    #[test]
    fn test_job_id_rejects_template_and_path_characters() {
        for token in ["", "has space", "a$b", "../up", "a.b", "ünï"] {
            let err = JobId::parse(token).unwrap_err();
            assert_eq!(err.token, token);
        }
        assert!(JobId::parse(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_status_only_moves_forward() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Complete));
        assert!(Processing.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Failed));

        assert!(!Complete.can_transition_to(Processing));
        assert!(!Complete.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Complete));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Complete));
    }

    #[test]
    fn test_status_round_trips_through_column_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Complete,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("READY".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_ladder_parse_keeps_order() {
        let ladder: Ladder = "1024k@1280x720, 512k@640x360".parse().unwrap();
        assert_eq!(
            ladder.renditions(),
            &[Rendition::new(1024, 1280, 720), Rendition::new(512, 640, 360)]
        );
        assert_eq!(ladder.renditions()[0].bandwidth(), 1_024_000);
        assert_eq!(ladder.renditions()[1].bitrate_arg(), "512k");
    }

    #[test]
    fn test_ladder_rejects_bad_input() {
        assert_eq!("".parse::<Ladder>(), Err(LadderError::Empty));
        assert!(matches!(
            "512k".parse::<Ladder>(),
            Err(LadderError::Entry(_))
        ));
        assert!(matches!(
            "fast@640x360".parse::<Ladder>(),
            Err(LadderError::Bitrate(_))
        ));
        assert!(matches!(
            "512k@640by360".parse::<Ladder>(),
            Err(LadderError::Resolution(_))
        ));
        assert_eq!(Ladder::new(vec![]), Err(LadderError::Empty));
    }

    #[test]
    fn test_default_ladder_matches_three_tier_profile() {
        let ladder = Ladder::default();
        let rendered: Vec<String> = ladder.renditions().iter().map(|r| r.to_string()).collect();
        assert_eq!(
            rendered,
            ["512k@640x360", "768k@960x540", "1024k@1280x720"]
        );
    }
}
