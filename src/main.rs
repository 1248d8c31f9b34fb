use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use cricket_query_backend::api::handlers::AppState;
use cricket_query_backend::api::routes::create_router_with_state;
use cricket_query_backend::config::Config;
use cricket_query_backend::services::{DatasetSnapshot, LlmService, QueryPipeline, TextGenerator};
use cricket_query_backend::storage::InteractionStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_ansi(config.logging.style != "never")
        .init();

    info!("Starting server on {}", config.server_address());

    // Load the dataset snapshot once; every request shares it read-only
    let snapshot = DatasetSnapshot::load_parquet_dir(Path::new(&config.dataset.data_dir), config.dataset.version.clone())
        .await
        .map_err(|e| {
            error!("Failed to load dataset from {}: {:#}", config.dataset.data_dir, e);
            e
        })?;

    let llm = LlmService::new(&config.llm);
    let generator: Option<Arc<dyn TextGenerator>> = if llm.is_configured() {
        Some(Arc::new(llm))
    } else {
        warn!("LLM_GATEWAY_URL is not set; only template routines are available");
        None
    };
    let pipeline = QueryPipeline::from_config(&config, generator)?;

    // Initialize SQLite interaction log
    let store = InteractionStore::new(&config.storage.url).await.map_err(|e| {
        error!("Failed to initialize interaction log: {}", e);
        e
    })?;

    let state = AppState {
        pipeline: Arc::new(pipeline),
        snapshot: Arc::new(snapshot),
        store: Arc::new(store),
    };
    let app: Router = create_router_with_state(state);

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
