pub mod catalog;
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod keys;
pub mod middleware;
pub mod models;
pub mod services;

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{sliding_window_middleware, RateLimiter, SlidingWindow},
    security_headers::security_headers_middleware,
    signature::{webhook_signature_middleware, WebhookVerifier},
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use service_core::store::KeyValueStore;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AgentLibraryConfig;
use crate::services::{
    AgentCatalog, AgentStore, Authenticator, Cache, Identity, UsageTracker, UserStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AgentLibraryConfig,
    pub users: Arc<dyn UserStore>,
    pub store: Arc<dyn KeyValueStore>,
    pub authenticator: Arc<dyn Authenticator>,
    pub catalog: AgentCatalog,
    pub usage: UsageTracker,
    pub rate_limiter: RateLimiter<dyn KeyValueStore>,
    pub webhook_verifier: WebhookVerifier,
}

impl AppState {
    /// Wire the services that share the key-value store.
    pub fn new(
        config: AgentLibraryConfig,
        users: Arc<dyn UserStore>,
        agents: Arc<dyn AgentStore>,
        store: Arc<dyn KeyValueStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let catalog = AgentCatalog::new(
            agents,
            Cache::new(store.clone()),
            config.cache.agents_ttl_seconds,
        );
        let usage = UsageTracker::new(store.clone(), config.cache.usage_ttl_seconds);
        let rate_limiter = RateLimiter::new(
            store.clone(),
            SlidingWindow::new(config.rate_limit.requests, config.rate_limit.window_seconds),
        );
        let webhook_verifier = WebhookVerifier::new(config.clerk.webhook_secret.clone());

        Self {
            config,
            users,
            store,
            authenticator,
            catalog,
            usage,
            rate_limiter,
            webhook_verifier,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Authenticated reads
    let read_routes = Router::new()
        .route("/api/usage", get(handlers::usage::get_usage))
        .route("/api/user", get(handlers::user::get_user))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Authenticated writes, rate limited per user
    let write_routes = Router::new()
        .route("/api/agents", post(handlers::agents::create_agent))
        .route("/api/usage", post(handlers::usage::record_usage))
        .route("/api/user", post(handlers::user::update_user))
        .layer(from_fn_with_state(
            state.rate_limiter.clone(),
            sliding_window_middleware::<Identity, dyn KeyValueStore>,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let webhook_route = Router::new()
        .route("/api/webhook", post(handlers::webhook::handle_webhook))
        .layer(from_fn_with_state(
            state.webhook_verifier.clone(),
            webhook_signature_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/api/agents", get(handlers::agents::list_agents))
        .route("/api/agents/:id", get(handlers::agents::get_agent))
        .merge(read_routes)
        .merge(write_routes)
        .merge(webhook_route)
        .with_state(state.clone())
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", origin, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .allow_credentials(true)
}

/// Service health check
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.users.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "MongoDB health check failed");
        AppError::ServiceUnavailable
    })?;

    state.store.ping().await.map_err(|e| {
        tracing::error!(error = %e, "Redis health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "mongodb": "up",
            "redis": "up"
        }
    })))
}
