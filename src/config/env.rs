use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    AmqpUrl,
    TranscodeQueue,
    WorkerConcurrency,
    MaxAttempts,
    FfmpegBin,
    TranscodeLadder,
    SegmentDuration,
    ProcessTimeoutSecs,
    RunMigrations,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::AmqpUrl => "AMQP_URL",
            EnvKey::TranscodeQueue => "TRANSCODE_QUEUE",
            EnvKey::WorkerConcurrency => "WORKER_CONCURRENCY",
            EnvKey::MaxAttempts => "MAX_ATTEMPTS",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
            EnvKey::TranscodeLadder => "TRANSCODE_LADDER",
            EnvKey::SegmentDuration => "SEGMENT_DURATION",
            EnvKey::ProcessTimeoutSecs => "PROCESS_TIMEOUT_SECS",
            EnvKey::RunMigrations => "RUN_MIGRATIONS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
