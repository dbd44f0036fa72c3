use std::time::Duration;

use thiserror::Error;

use crate::config::env::{self, EnvKey};
use crate::modules::transcode::model::{Ladder, LadderError};

pub const DEFAULT_AMQP_URL: &str = "amqp://127.0.0.1:5672/%2f";
pub const DEFAULT_QUEUE: &str = "transcoding_tasks";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid {key}: {source}")]
    Ladder {
        key: &'static str,
        #[source]
        source: LadderError,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub amqp_url: String,
    pub queue_name: String,
    pub worker_concurrency: usize,
    pub max_attempts: u32,
    pub ffmpeg_bin: String,
    pub ladder: Ladder,
    pub segment_duration: u32,
    pub process_timeout: Option<Duration>,
    pub run_migrations: bool,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let ladder = match env::get(EnvKey::TranscodeLadder) {
            Ok(raw) => raw.parse::<Ladder>().map_err(|source| ConfigError::Ladder {
                key: EnvKey::TranscodeLadder.as_str(),
                source,
            })?,
            Err(_) => Ladder::default(),
        };

        let worker_concurrency = env::get_parsed(EnvKey::WorkerConcurrency, 2usize);
        if worker_concurrency == 0 {
            return Err(ConfigError::Zero(EnvKey::WorkerConcurrency.as_str()));
        }

        let max_attempts = env::get_parsed(EnvKey::MaxAttempts, 3u32);
        if max_attempts == 0 {
            return Err(ConfigError::Zero(EnvKey::MaxAttempts.as_str()));
        }

        let segment_duration = env::get_parsed(EnvKey::SegmentDuration, 10u32);
        if segment_duration == 0 {
            return Err(ConfigError::Zero(EnvKey::SegmentDuration.as_str()));
        }

        // 0 disables the limit
        let process_timeout = match env::get_parsed(EnvKey::ProcessTimeoutSecs, 0u64) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: env::get(EnvKey::DatabaseUrl).ok(),
            amqp_url: env::get_or(EnvKey::AmqpUrl, DEFAULT_AMQP_URL),
            queue_name: env::get_or(EnvKey::TranscodeQueue, DEFAULT_QUEUE),
            worker_concurrency,
            max_attempts,
            ffmpeg_bin: env::get_or(EnvKey::FfmpegBin, "ffmpeg"),
            ladder,
            segment_duration,
            process_timeout,
            run_migrations: env::get_parsed(EnvKey::RunMigrations, false),
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing(EnvKey::DatabaseUrl.as_str()))
    }
}
