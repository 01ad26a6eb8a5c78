use agent_library_service::{
    build_router,
    config::AgentLibraryConfig,
    services::{Authenticator, JwtAuthenticator, MongoDb, StaticAuthenticator},
    AppState,
};
use service_core::observability::logging::{init_tracing, shutdown_tracing};
use service_core::store::RedisStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = AgentLibraryConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    agent_library_service::services::metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting agent library service"
    );

    let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database).await?;
    db.initialize_indexes().await?;
    tracing::info!("Database initialized successfully");

    let redis = RedisStore::connect(&config.redis.url).await?;
    tracing::info!("Redis store initialized");

    let authenticator: Arc<dyn Authenticator> = match (
        config.clerk.is_configured(),
        config.clerk.jwt_key_path.as_deref(),
    ) {
        (true, Some(path)) => Arc::new(JwtAuthenticator::from_file(
            path,
            config.clerk.authorized_parties.clone(),
        )?),
        (false, _) => {
            tracing::warn!("Identity provider keys not configured, rejecting all authenticated requests");
            Arc::new(StaticAuthenticator::new())
        }
        (true, None) => {
            tracing::warn!("CLERK_JWT_KEY_PATH not set, rejecting all authenticated requests");
            Arc::new(StaticAuthenticator::new())
        }
    };

    let db = Arc::new(db);
    let state = AppState::new(
        config.clone(),
        db.clone(),
        db,
        Arc::new(redis),
        authenticator,
    );

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
