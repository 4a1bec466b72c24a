use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sikat::{
    auth::jwt::JwtService, config::AppConfig, db, routes, state::AppState,
    storage::build_storage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        storage_backend = ?config.storage_backend,
        max_upload_size = config.max_upload_size,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let applied = db::run_migrations(&pool)?;
    info!(applied, "database migrations up to date");

    let storage = build_storage(&config).await?;
    let jwt = JwtService::from_config(&config)?;
    let addr = format!("{}:{}", config.server_host, config.server_port);

    let state = AppState::new(pool, config, storage, jwt);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections");
}
