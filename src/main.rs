//! SpineScan Server
//!
//! A self-hosted server for cataloging library books from spine photos.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::signal;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spinescan_server::config::{Config, StorageDriver};
use spinescan_server::db::UserRepository;
use spinescan_server::queue::OcrQueue;
use spinescan_server::state::AppState;
use spinescan_server::{db, ocr, storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spinescan_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting SpineScan Server v{}", env!("CARGO_PKG_VERSION"));

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database initialized at {}", config.database.url);

    if let (Some(email), Some(password)) = (
        config.auth.seed_admin_email.as_deref(),
        config.auth.seed_admin_password.as_deref(),
    ) {
        UserRepository::new(&pool).seed_admin(email, password).await?;
    }

    let storage_backend = storage::from_config(&config.storage).await?;
    let ocr_backend = ocr::from_config(&config.ocr)?;
    tracing::info!("OCR backend: {}", ocr_backend.name());

    let queue = OcrQueue::new(
        pool.clone(),
        storage_backend.clone(),
        ocr_backend,
        Duration::from_secs(config.ocr.timeout_secs),
        1,
    );
    // Pick up jobs left queued by a previous run.
    queue.start().await?;

    let state = AppState::new(config.clone(), pool, storage_backend, queue);
    let mut app = spinescan_server::app(state)?;

    if config.storage.driver == StorageDriver::Local {
        app = app.nest_service("/uploads", ServeDir::new(&config.storage.local_dir));
    }

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("SpineScan Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
