use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::modules::transcode::events::TranscodeJob;
use crate::modules::transcode::handler::{JobHandler, JobRequest};
use crate::modules::transcode::status::StatusCommitter;
use crate::state::AppState;
use anyhow::Result;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

/// What to tell the broker about one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Publish a fresh copy with a bumped attempt counter, then ack the original.
    Retry(TranscodeJob),
    /// Put the delivery back untouched (worker shutting down mid-job).
    Requeue,
}

/// Start `worker_concurrency` consumers and run until `shutdown` fires.
pub async fn start_transcoder_worker<S>(
    state: AppState,
    handler: Arc<JobHandler<S>>,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: StatusCommitter + 'static,
{
    info!(
        "🎥 Starting {} transcoder worker(s) on '{}'",
        state.config.worker_concurrency, state.config.queue_name
    );

    let mut workers = JoinSet::new();
    for worker in 0..state.config.worker_concurrency {
        let state = state.clone();
        let handler = Arc::clone(&handler);
        let shutdown = shutdown.clone();
        let span = tracing::info_span!("worker", worker);

        workers.spawn(
            async move {
                if let Err(e) = run_consumer(worker, state, handler, shutdown).await {
                    error!("❌ Consumer stopped: {}", e);
                }
            }
            .instrument(span),
        );
    }

    while workers.join_next().await.is_some() {}

    info!("🎥 Transcoder workers stopped");
    Ok(())
}

async fn run_consumer<S>(
    worker: usize,
    state: AppState,
    handler: Arc<JobHandler<S>>,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: StatusCommitter + 'static,
{
    let queue_name = state.config.queue_name.as_str();
    let channel = state.queue.create_channel().await?;

    RabbitMqService::declare_queue(&channel, queue_name).await?;

    // One unacked delivery per consumer: a worker never holds a second job.
    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to set prefetch: {}", e))?;

    let tag = format!("transcoder_worker_{worker}");
    let mut consumer = channel
        .basic_consume(
            queue_name,
            tag.as_str(),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create consumer: {}", e))?;

    info!("🎥 Worker listening on '{}' as {}", queue_name, tag);

    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = consumer.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!("Failed to receive delivery: {}", e);
                    continue;
                }
                None => {
                    warn!("Consumer stream closed");
                    break;
                }
            },
        };

        let disposition = process_delivery(&handler, &delivery.data, state.config.max_attempts, &shutdown).await;
        settle(&state, &delivery, disposition).await;
    }

    Ok(())
}

/// Run the handler for one raw message and decide how to settle it.
pub async fn process_delivery<S: StatusCommitter>(
    handler: &JobHandler<S>,
    payload: &[u8],
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Disposition {
    let job = match serde_json::from_slice::<TranscodeJob>(payload) {
        Ok(job) => job,
        Err(e) => {
            error!("❌ Dropping unparseable job message: {}", e);
            return Disposition::Ack;
        }
    };

    info!("📦 Received transcoding job (attempt {})", job.attempt + 1);
    let request = JobRequest::attempt(&job.input_path, job.attempt, max_attempts);

    match handler.handle(&request, cancel).await {
        Ok(outcome) => {
            info!("✅ Finished {}", outcome.input_path.display());
            Disposition::Ack
        }
        Err(e) if e.is_cancelled() => Disposition::Requeue,
        Err(e) if e.is_retryable() && !request.final_attempt => Disposition::Retry(job.next_attempt()),
        Err(_) => Disposition::Ack,
    }
}

async fn settle(state: &AppState, delivery: &Delivery, disposition: Disposition) {
    if let Disposition::Retry(job) = &disposition {
        let republished = match serde_json::to_vec(job) {
            Ok(payload) => state.queue.publish(&state.config.queue_name, &payload).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = republished {
            // Fall back to a plain requeue so the message is not lost
            warn!("Failed to republish job for retry: {}", e);
            nack_requeue(delivery).await;
            return;
        }
        info!("🔁 Job re-enqueued as attempt {}", job.attempt + 1);
    }

    match disposition {
        Disposition::Ack | Disposition::Retry(_) => {
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                error!("Failed to ack message: {}", e);
            }
        }
        Disposition::Requeue => nack_requeue(delivery).await,
    }
}

async fn nack_requeue(delivery: &Delivery) {
    let options = BasicNackOptions {
        requeue: true,
        ..BasicNackOptions::default()
    };
    if let Err(e) = delivery.nack(options).await {
        error!("Failed to nack message: {}", e);
    }
}
