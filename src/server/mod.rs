pub mod http;

use anyhow::Result;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::auth::{AuthBroker, AuthState};
use crate::config::Config;
use crate::gateway::DriveGateway;
use crate::session::SessionContext;
use http::AppState;

/// Wire the core together from configuration and restore any stored credential
pub async fn build_state(config: &Config) -> Result<AppState> {
    let session = SessionContext::new();
    let store = config.credential_store()?;

    let broker = AuthBroker::new(config.oauth_settings(), session.clone(), store)?;
    match broker.bootstrap().await {
        AuthState::Authenticated => info!("✓ Session restored from credential store"),
        _ => info!("  Visit /auth to connect a Google Drive account"),
    }

    let gateway = DriveGateway::new(session).with_base_url(config.google.api_base.clone());
    let assistant = config.command_interpreter().map(Arc::new);
    if assistant.is_some() {
        info!("✓ Command assistant enabled ({})", config.assistant.model);
    }

    Ok(AppState {
        broker: Arc::new(broker),
        gateway: Arc::new(gateway),
        assistant,
        page_size: config.google.page_size,
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(http::home_handler))
        .route("/health", get(http::health_handler))
        .route("/metrics", get(http::metrics_handler))
        // OAuth2 authorization-code flow
        .route("/auth", get(http::auth_handler))
        .route("/callback", get(http::callback_handler))
        // Drive
        .route("/files", get(http::files_handler))
        .route("/files/:file_id", get(http::file_metadata_handler))
        .route("/download/:file_id", get(http::download_handler))
        // Experimental natural-language commands
        .route("/command", post(http::command_handler))
        .route_layer(middleware::from_fn(http::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the HTTP surface until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    let state = build_state(&config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("✓ HTTP server listening on {}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
