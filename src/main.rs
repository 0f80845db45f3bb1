//! dagchat - branching conversation server
//!
//! Conversations are a DAG of nodes: linear chat on a trunk, exploration
//! branches proposed by the model, and merges that synthesize branches back.

mod api;
mod config;
mod db;
mod engine;
mod graph;
mod lifecycle;
mod llm;
mod prompts;
mod title_generator;

use api::{create_router, AppState};
use config::Config;
use db::Database;
use engine::{DatabaseStore, Engine, ProductionEngine, RegistryGenerator};
use llm::{LlmConfig, ModelRegistry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dagchat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API keys configured. Set GEMINI_API_KEY or LLM_GATEWAY.");
    }

    let generator = RegistryGenerator::new(
        Arc::clone(&llm_registry),
        llm_registry.default_model_id().to_string(),
    );
    let titles = RegistryGenerator::auxiliary(Arc::clone(&llm_registry));
    let engine: Arc<ProductionEngine> = Arc::new(
        Engine::new(DatabaseStore::new(db), generator)
            .with_title_generator(Arc::new(titles))
            // Live streams are touched well inside the stale window
            .with_heartbeat(config.stale_node_age / 3),
    );

    // No generation survives a restart
    let settled = engine.reconcile_stale_nodes(chrono::Utc::now()).await?;
    if settled > 0 {
        tracing::warn!(count = settled, "Failed generations interrupted by shutdown");
    }

    let shutdown = CancellationToken::new();
    let reconciler = tokio::spawn(reconcile_periodically(
        Arc::clone(&engine),
        config.stale_node_age,
        config.reconcile_interval,
        shutdown.clone(),
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let state = AppState::new(engine, llm_registry);
    let app = create_router(state).layer(cors).layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("dagchat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    reconciler.await?;
    Ok(())
}

/// Fail generations that stopped making progress, until cancelled
async fn reconcile_periodically(
    engine: Arc<ProductionEngine>,
    stale_after: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let stale_after = chrono::Duration::from_std(stale_after)
        .unwrap_or_else(|_| chrono::Duration::seconds(300));
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(cutoff) = chrono::Utc::now().checked_sub_signed(stale_after) else {
                    continue;
                };
                if let Err(e) = engine.reconcile_stale_nodes(cutoff).await {
                    tracing::warn!(error = %e, "Reconciliation pass failed");
                }
            }
        }
    }
}
