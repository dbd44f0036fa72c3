use std::path::{Path, PathBuf};

use serde::Serialize;

use super::model::{InvalidIdentity, JobId, Ladder};

/// Placeholder the packager replaces with the representation index.
pub const REPRESENTATION_ID: &str = "$RepresentationID$";
/// Placeholder the packager replaces with the representation bandwidth.
pub const BANDWIDTH: &str = "$Bandwidth$";
/// Placeholder the packager replaces with the segment sequence number.
pub const NUMBER: &str = "$Number$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepresentationArtifacts {
    pub index: usize,
    pub bandwidth: u64,
    pub init_segment: String,
}

/// File names a job writes into its workspace. All relative to the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
    pub job_id: JobId,
    pub manifest: String,
    pub init_segment_template: String,
    pub media_segment_template: String,
    pub thumbnail: String,
    pub representations: Vec<RepresentationArtifacts>,
}

impl ArtifactSet {
    pub fn manifest_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.manifest)
    }

    pub fn thumbnail_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.thumbnail)
    }

    /// Whether `file_name` is one of this job's outputs, including packager-expanded segments.
    ///
    /// Only the exact expanded shapes match: `init_{id}_<n>.mp4` and
    /// `chunk_{id}_<bandwidth>_<n>.m4s`. Ids may contain `_`, so a prefix match
    /// would let `a` claim the files of `a_b`.
    pub fn owns(&self, file_name: &str) -> bool {
        if file_name == self.manifest || file_name == self.thumbnail {
            return true;
        }

        if let Some(index) = self.segment_suffix(file_name, "init_", ".mp4") {
            return is_number(index);
        }
        self.segment_suffix(file_name, "chunk_", ".m4s")
            .and_then(|rest| rest.split_once('_'))
            .is_some_and(|(bandwidth, number)| is_number(bandwidth) && is_number(number))
    }

    fn segment_suffix<'a>(&self, file_name: &'a str, prefix: &str, extension: &str) -> Option<&'a str> {
        file_name
            .strip_prefix(prefix)?
            .strip_prefix(self.job_id.as_str())?
            .strip_prefix('_')?
            .strip_suffix(extension)
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

pub struct ArtifactNamer;

impl ArtifactNamer {
    /// Extract the job identity from the input file's base name.
    pub fn job_id(input_path: &Path) -> Result<JobId, InvalidIdentity> {
        let stem = input_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| InvalidIdentity {
                token: input_path.display().to_string(),
                reason: "input path has no usable file name",
            })?;
        JobId::parse(stem)
    }

    pub fn derive(input_path: &Path, ladder: &Ladder) -> Result<ArtifactSet, InvalidIdentity> {
        let job_id = Self::job_id(input_path)?;
        Ok(Self::for_job(job_id, ladder))
    }

    pub fn for_job(job_id: JobId, ladder: &Ladder) -> ArtifactSet {
        let id = job_id.as_str();

        let representations = ladder
            .renditions()
            .iter()
            .enumerate()
            .map(|(index, rendition)| RepresentationArtifacts {
                index,
                bandwidth: rendition.bandwidth(),
                init_segment: format!("init_{id}_{index}.mp4"),
            })
            .collect();

        ArtifactSet {
            manifest: format!("{id}.mpd"),
            init_segment_template: format!("init_{id}_{REPRESENTATION_ID}.mp4"),
            media_segment_template: format!("chunk_{id}_{BANDWIDTH}_{NUMBER}.m4s"),
            thumbnail: format!("thumbnail_{id}.jpg"),
            representations,
            job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::transcode::model::Rendition;

    #[test]
    fn test_derive_names_from_base_name() {
        let set = ArtifactNamer::derive(
            Path::new("/srv/static/tmp/6728f0dd8289003926090026/6728f0dd8289003926090026.mp4"),
            &Ladder::default(),
        )
        .unwrap();

        assert_eq!(set.job_id.as_str(), "6728f0dd8289003926090026");
        assert_eq!(set.manifest, "6728f0dd8289003926090026.mpd");
        assert_eq!(
            set.init_segment_template,
            "init_6728f0dd8289003926090026_$RepresentationID$.mp4"
        );
        assert_eq!(
            set.media_segment_template,
            "chunk_6728f0dd8289003926090026_$Bandwidth$_$Number$.m4s"
        );
        assert_eq!(set.thumbnail, "thumbnail_6728f0dd8289003926090026.jpg");
    }

    #[test]
    fn test_derive_is_deterministic() {
        let path = Path::new("uploads/abc123.mov");
        let ladder = Ladder::default();
        assert_eq!(
            ArtifactNamer::derive(path, &ladder).unwrap(),
            ArtifactNamer::derive(path, &ladder).unwrap()
        );
    }

    #[test]
    fn test_representations_follow_ladder_order() {
        let ladder = Ladder::new(vec![
            Rendition::new(2000, 1920, 1080),
            Rendition::new(300, 426, 240),
        ])
        .unwrap();
        let set = ArtifactNamer::derive(Path::new("abc123.mp4"), &ladder).unwrap();

        let summary: Vec<(usize, u64, &str)> = set
            .representations
            .iter()
            .map(|r| (r.index, r.bandwidth, r.init_segment.as_str()))
            .collect();
        assert_eq!(
            summary,
            [
                (0, 2_000_000, "init_abc123_0.mp4"),
                (1, 300_000, "init_abc123_1.mp4"),
            ]
        );
    }

    #[test]
    fn test_invalid_base_names_are_rejected() {
        let ladder = Ladder::default();
        for path in ["/tmp/.mp4", "/tmp/bad name.mp4", "/tmp/a$b.mp4", "/tmp/x.y.mp4", "/"] {
            assert!(
                ArtifactNamer::derive(Path::new(path), &ladder).is_err(),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_distinct_jobs_own_disjoint_names() {
        let ladder = Ladder::default();
        let a = ArtifactNamer::derive(Path::new("abc123.mp4"), &ladder).unwrap();
        let b = ArtifactNamer::derive(Path::new("abc1234.mp4"), &ladder).unwrap();

        assert!(a.owns("init_abc123_0.mp4"));
        assert!(a.owns("chunk_abc123_512000_1.m4s"));
        assert!(!a.owns("init_abc1234_0.mp4"));
        assert!(!a.owns("chunk_abc1234_512000_1.m4s"));
        assert!(b.owns("thumbnail_abc1234.jpg"));
        assert!(!b.owns("thumbnail_abc123.jpg"));
    }

    #[test]
    fn test_underscore_prefixed_ids_do_not_share_files() {
        let ladder = Ladder::default();
        let a = ArtifactNamer::derive(Path::new("a.mp4"), &ladder).unwrap();
        let ab = ArtifactNamer::derive(Path::new("a_b.mp4"), &ladder).unwrap();

        for name in ["init_a_b_0.mp4", "chunk_a_b_512000_1.m4s", "a_b.mpd", "thumbnail_a_b.jpg"] {
            assert!(ab.owns(name), "a_b should own {name}");
            assert!(!a.owns(name), "a should not own {name}");
        }
        for name in ["init_a_0.mp4", "chunk_a_512000_1.m4s", "a.mpd", "thumbnail_a.jpg"] {
            assert!(a.owns(name), "a should own {name}");
            assert!(!ab.owns(name), "a_b should not own {name}");
        }
    }

    #[test]
    fn test_owns_rejects_near_miss_shapes() {
        let set = ArtifactNamer::derive(Path::new("abc123.mp4"), &Ladder::default()).unwrap();
        assert!(!set.owns("init_abc123_.mp4"));
        assert!(!set.owns("init_abc123_0.m4s"));
        assert!(!set.owns("chunk_abc123_512000.m4s"));
        assert!(!set.owns("chunk_abc123_x_1.m4s"));
        assert!(!set.owns("abc123.mp4"));
        assert!(!set.owns(".abc123.probe"));
    }
}
