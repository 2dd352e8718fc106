mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method, header};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use agora_api::auth::{AppStateInner, JwtAuth};
use agora_db::Database;
use agora_gateway::{
    AuthProvider, ConnectionManager, ConnectionRegistry, Dispatcher, PostPipeline,
    RetentionEvictor,
};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "agora=debug,agora_gateway=debug,agora_api=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Store and auth come first; everything that fans out depends on them.
    let db = Arc::new(Database::open(&config.db_path)?);
    let auth: Arc<dyn AuthProvider> = Arc::new(JwtAuth::new(db.clone(), &config.jwt_secret));

    let shutdown = CancellationToken::new();
    let registry = ConnectionRegistry::new();
    let dispatcher = Dispatcher::new(registry.clone());
    let connections = ConnectionManager::new(
        registry,
        db.clone(),
        auth.clone(),
        config.stream_config(),
        shutdown.clone(),
    );
    let pipeline = PostPipeline::new(db.clone(), auth.clone(), dispatcher);

    let evictor = RetentionEvictor::new(db.clone(), config.retention_policy());
    let retention = tokio::spawn(evictor.run(config.retention_sweep, shutdown.clone()));

    let state = Arc::new(AppStateInner {
        db,
        auth,
        connections: connections.clone(),
        pipeline,
        retention: config.retention_policy(),
        admin_user_id: config.admin_user_id,
    });

    let app = agora_api::router(state)
        .layer(cors(&config)?)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Agora server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(connections))
        .await?;

    shutdown.cancel();
    if let Err(e) = retention.await {
        error!("Retention task failed: {}", e);
    }
    info!("Agora server stopped");

    Ok(())
}

fn cors(config: &Config) -> anyhow::Result<CorsLayer> {
    let Some(origin) = &config.frontend_url else {
        return Ok(CorsLayer::permissive());
    };

    Ok(CorsLayer::new()
        .allow_origin(origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true))
}

/// Resolves on Ctrl-C after closing every open stream, so long-lived SSE
/// responses end and the server can drain.
async fn shutdown_signal(connections: ConnectionManager) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    connections.shutdown();
}
