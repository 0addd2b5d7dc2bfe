// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persona-Contexts API Server
//!
//! Serves contexts, profiles and consent grants over HTTP.

use persona_contexts::{
    config::{Config, StoreBackend},
    db::{FirestoreStore, IdentityStore, MemoryStore},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Persona-Contexts API");

    let store: Arc<dyn IdentityStore> = match config.store_backend {
        StoreBackend::Firestore => {
            let mut store = FirestoreStore::new(&config.gcp_project_id).await?;
            if let Some(node) = config.id_node {
                tracing::info!(node, "Using configured id node");
                store = store.with_id_node(node);
            }
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Build shared state
    let state = Arc::new(AppState::new(config.clone(), store)?);

    // Build router
    let app = persona_contexts::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("persona_contexts=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
