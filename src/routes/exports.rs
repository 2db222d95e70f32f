//! Checkout export routes

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::SignedCookieJar;

use crate::db::CheckoutRepository;
use crate::error::{AppError, Result};
use crate::state::AppState;

use super::auth::require_admin;

pub fn router() -> Router<AppState> {
    Router::new().route("/checkouts.csv", get(export_checkouts))
}

/// Download every checkout as CSV, newest first.
async fn export_checkouts(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<(HeaderMap, Vec<u8>)> {
    require_admin(&state, &jar).await?;

    let rows = CheckoutRepository::new(&state.pool).export_rows().await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["image_id", "book_id", "title", "author", "admin_email", "checked_out_at"])?;
    for row in rows {
        writer.write_record([
            &row.image_id,
            &row.book_id,
            &row.title,
            &row.author,
            &row.admin_email,
            &row.checked_out_at,
        ])?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to flush CSV: {}", e)))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"checkouts.csv\""),
    );

    Ok((headers, body))
}
