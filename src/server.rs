//! Server setup and initialization
//!
//! Wires together all components: storage, run history, execution engine,
//! live run registry and HTTP routes.

use crate::{
    api::{create_run_routes, create_workflow_routes, AppState},
    config::Config,
    database::open_pool,
    history::SqliteHistoryStore,
    runtime::{ExecutionEngine, HttpTaskDispatcher, NodeExecutor, PollPolicy, RunRegistry},
    workflow::WorkflowStorage,
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
///
/// Opens the database, creates the schemas and builds the execution stack
/// against the configured remote task service.
pub async fn create_app(config: Config) -> Result<Router> {
    let pool = open_pool(&config.database.data_dir).await?;

    tracing::info!("📋 Initializing workflow storage");
    let storage = WorkflowStorage::new(pool.clone());
    storage
        .init_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize workflow schema: {}", e))?;

    tracing::info!("📝 Initializing run history");
    let history = SqliteHistoryStore::new(pool);
    history
        .init_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize history schema: {}", e))?;

    tracing::info!("🔌 Connecting task dispatcher to {}", config.dispatcher.base_url);
    let dispatcher = HttpTaskDispatcher::new(&config.dispatcher)
        .map_err(|e| anyhow::anyhow!("Failed to initialize task dispatcher: {}", e))?;

    tracing::info!(
        "⚙️ Initializing node executor (poll every {}ms, give up after {}ms)",
        config.engine.poll_interval_ms,
        config.engine.max_poll_wait_ms
    );
    let executor = NodeExecutor::new(Arc::new(dispatcher), PollPolicy::from(&config.engine));
    let engine = Arc::new(ExecutionEngine::new(Arc::new(executor)));

    let state = AppState {
        storage,
        history,
        engine,
        runs: Arc::new(RunRegistry::new(config.engine.log_capacity)),
    };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_run_routes())
        .with_state(state);

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting nodeflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
