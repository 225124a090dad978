use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use exam_proctor_server::api;
use exam_proctor_server::config::{Config, LogFormat};
use exam_proctor_server::exam::{ExamStore, InMemoryExamStore};
use exam_proctor_server::{ProctorError, ProctorServer};

const DEFAULT_LOG_FILTER: &str = "exam_proctor_server=info,proctor_server=info";

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(config.logging.format);

    tracing::info!("Exam proctor server v{} starting", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn ExamStore> = match &config.scheduler.seed_path {
        Some(path) => {
            let store = InMemoryExamStore::from_seed_file(path).await?;
            tracing::info!(path = %path.display(), "Exam sessions loaded from seed file");
            Arc::new(store)
        }
        None => Arc::new(InMemoryExamStore::new()),
    };

    let server = Arc::new(ProctorServer::from_config(&config, store));
    let shutdown = CancellationToken::new();
    let background = server.start_background_tasks(&shutdown);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_token.cancel();
    });

    let routes = api::routes(server.clone(), &config);
    let server_token = shutdown.clone();
    let (addr, serving) = warp::serve(routes).try_bind_with_graceful_shutdown(
        config.bind_address(),
        async move { server_token.cancelled().await },
    )
    .map_err(|e| ProctorError::Transport(e.to_string()))?;

    tracing::info!(
        address = %addr,
        scheduler_interval_secs = config.scheduler.interval.as_secs(),
        heartbeat_timeout_secs = ?config.presence.heartbeat_timeout.map(|t| t.as_secs()),
        "Listening for proctoring connections on /proctor/ws"
    );

    serving.await;

    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Exam proctor server stopped");
    Ok(())
}
