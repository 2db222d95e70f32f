//! Image API routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::{Deserialize, Serialize};

use crate::db::{
    BookRepository, CheckoutRepository, Image, ImageRepository, ImageStatus, JobRepository, OcrJob,
};
use crate::error::{AppError, Result};
use crate::state::AppState;

use super::auth::require_admin;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_image).patch(update_image))
        .route("/:id/retry", post(retry_image))
        .route("/:id/checkout", post(checkout_image))
}

/// Image plus its latest OCR job and public URLs, as the browser sees it.
#[derive(Serialize)]
pub struct ImageView {
    #[serde(flatten)]
    pub image: Image,
    pub url: String,
    pub thumb_url: Option<String>,
    pub job: Option<OcrJob>,
}

pub async fn image_view(state: &AppState, image: Image) -> Result<ImageView> {
    let job = JobRepository::new(&state.pool)
        .latest_for_image(&image.id)
        .await?;

    Ok(ImageView {
        url: state.storage.public_url(&image.storage_path),
        thumb_url: image
            .thumb_path
            .as_deref()
            .map(|p| state.storage.public_url(p)),
        job,
        image,
    })
}

async fn get_image(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(id): Path<String>,
) -> Result<Json<ImageView>> {
    require_admin(&state, &jar).await?;

    let image = ImageRepository::new(&state.pool)
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No image: {}", id)))?;

    Ok(Json(image_view(&state, image).await?))
}

#[derive(Deserialize)]
struct UpdateImageRequest {
    title: Option<String>,
    author: Option<String>,
}

/// Patch the title/author an admin corrected by hand. Absent fields keep
/// their current value.
async fn update_image(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(id): Path<String>,
    Json(body): Json<UpdateImageRequest>,
) -> Result<Json<ImageView>> {
    require_admin(&state, &jar).await?;

    let image = ImageRepository::new(&state.pool)
        .update_details(&id, body.title.as_deref(), body.author.as_deref())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No image: {}", id)))?;

    Ok(Json(image_view(&state, image).await?))
}

/// Queue another OCR attempt for the image. The new job row supersedes any
/// older one.
async fn retry_image(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(id): Path<String>,
) -> Result<Json<ImageView>> {
    require_admin(&state, &jar).await?;

    let images = ImageRepository::new(&state.pool);
    let image = images
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No image: {}", id)))?;

    JobRepository::new(&state.pool).create(&id).await?;
    state.queue.enqueue(&id);

    Ok(Json(image_view(&state, image).await?))
}

#[derive(Deserialize, Default)]
struct CheckoutRequest {
    title: Option<String>,
    author: Option<String>,
}

#[derive(Serialize)]
struct CheckoutResponse {
    image: ImageView,
    book: crate::db::Book,
    checkout: crate::db::Checkout,
}

/// Finalize an image into a book checkout.
///
/// Title/author come from the request body when given, otherwise from the
/// image row; both must end up non-empty. Checking out twice is rejected.
async fn checkout_image(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(id): Path<String>,
    body: Option<Json<CheckoutRequest>>,
) -> Result<Json<CheckoutResponse>> {
    let admin = require_admin(&state, &jar).await?;
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let images = ImageRepository::new(&state.pool);
    let image = images
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No image: {}", id)))?;

    if image.status == ImageStatus::CheckedOut {
        return Err(AppError::BadRequest("Image is already checked out".to_string()));
    }

    let title = body
        .title
        .or(image.title.clone())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("A title is required to check out".to_string()))?;
    let author = body
        .author
        .or(image.author.clone())
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AppError::BadRequest("An author is required to check out".to_string()))?;

    let book = BookRepository::new(&state.pool).upsert(&title, &author).await?;
    let checkout = CheckoutRepository::new(&state.pool)
        .create(&id, &book.id, &admin.id)
        .await?;
    images.mark_checked_out(&id, &title, &author).await?;

    let image = images
        .get(&id)
        .await?
        .ok_or_else(|| AppError::Internal("Image vanished during checkout".to_string()))?;

    Ok(Json(CheckoutResponse {
        image: image_view(&state, image).await?,
        book,
        checkout,
    }))
}
