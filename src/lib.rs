//! SpineScan Server
//!
//! A self-hosted server for cataloging library books from spine photos.
//! Staff upload batches of spine photos; an asynchronous OCR pipeline
//! extracts title/author, and checkout turns an image into a book record.

pub mod config;
pub mod db;
pub mod error;
pub mod ocr;
pub mod queue;
pub mod routes;
pub mod state;
pub mod storage;

use axum::http::{header, HeaderValue, Method};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the full application router.
pub fn app(state: AppState) -> anyhow::Result<Router> {
    // Credentialed cookies rule out wildcard CORS.
    let origin: HeaderValue = state.config.server.cors_origin.parse()?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Ok(Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", routes::auth::router())
        .nest("/api/batches", routes::batches::router())
        .nest("/api/images", routes::images::router())
        .nest("/api/exports", routes::exports::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}
