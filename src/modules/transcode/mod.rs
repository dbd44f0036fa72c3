use crate::config::settings::AppConfig;

pub mod artifacts;
pub mod encoder;
pub mod error;
pub mod events;
pub mod filter;
pub mod handler;
pub mod model;
pub mod process;
pub mod repository;
pub mod status;
pub mod thumbnail;
pub mod workspace;

use encoder::{DashLayout, EncoderInvoker};
use handler::JobHandler;
use status::StatusCommitter;
use thumbnail::ThumbnailInvoker;

/// Wire a handler from configuration around the given status store.
pub fn build_handler<S: StatusCommitter>(config: &AppConfig, store: S) -> JobHandler<S> {
    let encoder = EncoderInvoker::new(&config.ffmpeg_bin).with_timeout(config.process_timeout);
    let thumbnails = ThumbnailInvoker::new(&config.ffmpeg_bin).with_timeout(config.process_timeout);

    JobHandler::new(store, encoder, thumbnails)
        .with_ladder(config.ladder.clone())
        .with_layout(DashLayout::default().with_segment_duration(config.segment_duration))
}
