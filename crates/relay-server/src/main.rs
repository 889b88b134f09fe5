//! relay HTTP Server
//!
//! Axum host for the agent: `POST /api/chat`, `GET /api/models` and
//! `GET /health`, plus a background task that evicts idle sessions.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_core::Agent;
use relay_runtime::{assemble, RuntimeConfig};

use crate::handlers::{chat_handler, health_check, list_models};
use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let agent = Arc::new(assemble(RuntimeConfig::from_env())?);

    match agent.health_check().await {
        Ok(true) => tracing::info!(provider = %agent.service().kind(), model = %agent.model(), "Provider reachable"),
        Ok(false) => tracing::warn!(provider = %agent.service().kind(), "Provider answered but is not healthy"),
        Err(e) => tracing::warn!(provider = %agent.service().kind(), error = %e, "Provider not reachable, requests will fail"),
    }

    let tools = agent.tools().names();
    tracing::info!(count = tools.len(), tools = ?tools, "Registered tools");

    tokio::spawn(sweep_idle_sessions(agent.clone(), SWEEP_INTERVAL));

    let app = build_router(AppState { agent });

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("relay server running on http://{}", addr);
    tracing::info!("  GET  /health      - Health check");
    tracing::info!("  GET  /api/models  - Models of the active provider");
    tracing::info!("  POST /api/chat    - Send message");

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/chat", post(chat_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

async fn sweep_idle_sessions(agent: Arc<Agent>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let evicted = agent.evict_idle_sessions().await;
        tracing::debug!(evicted, sessions = agent.session_count(), "Idle session sweep");
    }
}
