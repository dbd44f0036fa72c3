use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Message published by ingest for every uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub input_path: PathBuf,
    /// Deliveries already made for this job, counting from zero.
    #[serde(default)]
    pub attempt: u32,
}

impl TranscodeJob {
    pub fn next_attempt(&self) -> Self {
        Self {
            input_path: self.input_path.clone(),
            attempt: self.attempt + 1,
        }
    }
}
