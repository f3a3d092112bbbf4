use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use swarm_overseer::api::{self, SharedOverseer};
use swarm_overseer::config::OverseerConfig;
use swarm_overseer::domain::events::EventKind;
use swarm_overseer::infrastructure::{FileLedgerClient, HttpTransport};
use swarm_overseer::overseer::SwarmOverseer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = OverseerConfig::from_env()?;
    tracing::info!(?config, "Configuration loaded");

    let ledger = Arc::new(FileLedgerClient::new(&config.snapshot_path));
    let transport = Arc::new(HttpTransport::new(config.send_timeout())?);
    let mut overseer = SwarmOverseer::new(ledger, transport, config.settings());

    overseer.on(EventKind::TaskFailed, |event| {
        tracing::error!(?event, "Task failed");
        Ok(())
    });

    // First sync before serving; a missing snapshot is not fatal
    match overseer.sync_state().await {
        Ok(outcome) => tracing::info!(?outcome, agents = overseer.get_agent_count(), "Initial sync"),
        Err(err) => tracing::warn!(error = %err, "Initial sync failed"),
    }

    let overseer: SharedOverseer = Arc::new(Mutex::new(overseer));
    spawn_sync_loop(overseer.clone(), config.sync_interval());
    spawn_timeout_loop(overseer.clone(), config.timeout_check_interval());

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::router(overseer)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    tracing::info!("Server listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_sync_loop(overseer: SharedOverseer, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = overseer.lock().await.sync_state().await {
                tracing::warn!(error = %err, "Periodic sync failed");
            }
        }
    });
}

fn spawn_timeout_loop(overseer: SharedOverseer, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let report = overseer.lock().await.check_timeouts().await;
            if !report.retried.is_empty() || !report.failed.is_empty() {
                tracing::info!(
                    retried = report.retried.len(),
                    failed = report.failed.len(),
                    stalled = report.stalled.len(),
                    "Timeout check"
                );
            }
        }
    });
}
