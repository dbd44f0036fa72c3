use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dash_transcoder::app;
use dash_transcoder::config::settings::AppConfig;
use dash_transcoder::infrastructure::db::pool::{self, DbPool};
use dash_transcoder::infrastructure::queue::rabbitmq::RabbitMqService;
use dash_transcoder::modules::transcode::artifacts::ArtifactNamer;
use dash_transcoder::modules::transcode::build_handler;
use dash_transcoder::modules::transcode::handler::JobRequest;
use dash_transcoder::modules::transcode::repository::PgStatusCommitter;
use dash_transcoder::modules::transcode::status::{MemoryStatusStore, StatusCommitter};
use dash_transcoder::state::AppState;
use dash_transcoder::workers::transcoder::start_transcoder_worker;

#[derive(Parser)]
#[command(name = "dash-transcoder", version, about = "DASH transcoding worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Consume jobs from the broker (default)
    Serve,
    /// Transcode a single file without the broker
    Run {
        input: PathBuf,
        /// Track status in memory instead of Postgres
        #[arg(long)]
        memory_store: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::new()?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Shutdown requested");
            signal.cancel();
        }
    });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, shutdown).await,
        Command::Run {
            input,
            memory_store: true,
        } => {
            let store = MemoryStatusStore::new();
            store.insert_pending(ArtifactNamer::job_id(&input)?).await;
            run_once(&config, store, input, &shutdown).await
        }
        Command::Run { input, .. } => {
            let db = connect(&config).await?;
            run_once(&config, PgStatusCommitter::new(db), input, &shutdown).await
        }
    }
}

async fn connect(config: &AppConfig) -> Result<DbPool> {
    let max_connections = u32::try_from(config.worker_concurrency).unwrap_or(u32::MAX).saturating_add(1);
    let db = pool::connect_to_db(config.require_database_url()?, max_connections).await?;
    if config.run_migrations {
        pool::run_migrations(&db).await?;
    }
    Ok(db)
}

async fn serve(config: AppConfig, shutdown: CancellationToken) -> Result<()> {
    let db = connect(&config).await?;
    let queue = RabbitMqService::new(&config.amqp_url).await?;
    let handler = Arc::new(build_handler(&config, PgStatusCommitter::new(db.clone())));
    let state = AppState::new(config, db, queue);

    let addr = format!("0.0.0.0:{}", state.config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Health endpoint on http://{}/api/v1/health", addr);

    let server = tokio::spawn(
        axum::serve(listener, app::create_app(state.clone()))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future(),
    );

    start_transcoder_worker(state, handler, shutdown.clone()).await?;

    shutdown.cancel();
    if let Err(e) = server.await? {
        error!("Health server error: {}", e);
    }
    Ok(())
}

async fn run_once<S: StatusCommitter>(
    config: &AppConfig,
    store: S,
    input: PathBuf,
    cancel: &CancellationToken,
) -> Result<()> {
    let handler = build_handler(config, store);
    let outcome = handler.handle(&JobRequest::new(input), cancel).await?;

    println!("{}", serde_json::to_string_pretty(&outcome.artifacts)?);
    info!("Artifacts written to {}", outcome.workspace.display());
    Ok(())
}
