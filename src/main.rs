//! nodeflow server entry point
//!
//! Serves:
//! - Workflow management and graph editing at /api/workflows/*
//! - Runs, cancellation, live state and history at /api/workflows/{id}/*
//! - Health check at /healthz

use nodeflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Defaults to 0.0.0.0:3004, ./data and a task service on 127.0.0.1:3030
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
