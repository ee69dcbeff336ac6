use axum::routing::{delete, get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use codedoc::api;
use codedoc::config::Config;
use codedoc::state::AppState;

/// Session sweeper cadence.
const CLEANUP_INTERVAL_SECS: u64 = 86_400;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("data directory: {}", config.data_dir.display());
    tracing::info!(
        "embedding provider: {} ({}), chat provider: {} ({})",
        config.embedding.primary.provider,
        config.embedding.primary.base_url,
        config.llm.provider,
        config.llm.base_url
    );

    let state = AppState::new(config.clone())?;

    // Pick interrupted ingestions back up from their journals.
    let resumed = state.ingest.resume_pending();
    if resumed > 0 {
        tracing::info!("resumed {resumed} pending ingestion(s)");
    }

    // Daily session expiry sweep.
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(std::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));
        tick.tick().await; // first tick is immediate; skip it
        loop {
            tick.tick().await;
            sessions.cleanup_expired().await;
        }
    });

    let app = Router::new()
        .route("/api/codebases", get(api::codebases::list_codebases))
        .route("/api/codebases", post(api::codebases::add_codebase))
        .route("/api/codebases/upload", post(api::codebases::upload_codebase))
        .route("/api/codebases/{id}/status", get(api::codebases::codebase_status))
        .route("/api/codebases/{id}", delete(api::codebases::delete_codebase))
        .route("/api/query", post(api::chat::query))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
