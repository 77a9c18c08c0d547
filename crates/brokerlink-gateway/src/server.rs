// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};
use brokerlink_config::ServerConfig;
use brokerlink_core::BrokerlinkError;
use brokerlink_session::SessionManager;
use brokerlink_status::StatusAggregator;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Health state for the unauthenticated health/metrics endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Optional Prometheus metrics render function.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: SessionManager,
    pub status: StatusAggregator,
    pub auth: AuthConfig,
    pub health: HealthState,
}

impl GatewayState {
    pub fn new(
        manager: SessionManager,
        config: &ServerConfig,
        prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
    ) -> Self {
        Self {
            status: StatusAggregator::new(manager.clone()),
            manager,
            auth: AuthConfig {
                bearer_token: config.bearer_token.clone(),
                user_header: config.user_header.to_ascii_lowercase(),
            },
            health: HealthState {
                start_time: std::time::Instant::now(),
                prometheus_render,
            },
        }
    }
}

/// Build the application router.
///
/// - `GET /health`, `GET /metrics` (no auth)
/// - everything under `/api` (bearer token + identity header)
pub fn router(state: GatewayState) -> Router {
    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route(
            "/api/brokers/{kind}/credentials",
            post(handlers::put_credential)
                .get(handlers::get_credential)
                .delete(handlers::delete_credential),
        )
        .route("/api/brokers/{kind}/test", post(handlers::test_connection))
        .route("/api/brokers/{kind}/logout", post(handlers::logout))
        .route("/api/brokers/{kind}/orders", post(handlers::place_order))
        .route("/api/brokers/status", get(handlers::get_status))
        .route(
            "/api/preferences",
            get(handlers::get_preferences).put(handlers::put_preferences),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API until `cancel` fires.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), BrokerlinkError> {
    if config.bearer_token.is_none() {
        tracing::warn!("server.bearer_token is not set; every API request will be rejected");
    }
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BrokerlinkError::Config(format!("failed to bind {addr}: {e}")))?;

    tracing::info!("API server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| BrokerlinkError::Internal(format!("API server error: {e}")))?;

    tracing::info!("API server stopped");
    Ok(())
}
