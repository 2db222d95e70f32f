//! Batch API routes
//!
//! A batch groups the spine photos uploaded in one sitting. Uploading
//! responds as soon as files are stored and rows created; OCR runs later
//! on the queue.

use axum::{
    extract::{Multipart, Path, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::Serialize;
use tracing::info;

use crate::db::{Batch, BatchRepository, ImageRepository, JobRepository, NewImage};
use crate::error::{AppError, Result};
use crate::state::AppState;

use super::auth::require_admin;
use super::images::{image_view, ImageView};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_batch).get(list_batches))
        .route("/:id", get(get_batch))
        .route("/:id/images", post(upload_images))
}

async fn create_batch(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<Json<Batch>> {
    let admin = require_admin(&state, &jar).await?;
    let batch = BatchRepository::new(&state.pool).create(&admin.id).await?;
    Ok(Json(batch))
}

async fn list_batches(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<Json<Vec<Batch>>> {
    require_admin(&state, &jar).await?;
    let batches = BatchRepository::new(&state.pool).list().await?;
    Ok(Json(batches))
}

#[derive(Serialize)]
struct BatchDetail {
    #[serde(flatten)]
    batch: Batch,
    images: Vec<ImageView>,
}

async fn get_batch(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(id): Path<String>,
) -> Result<Json<BatchDetail>> {
    require_admin(&state, &jar).await?;

    let batch = BatchRepository::new(&state.pool)
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No batch: {}", id)))?;

    let mut images = Vec::new();
    for image in ImageRepository::new(&state.pool).list_for_batch(&id).await? {
        images.push(image_view(&state, image).await?);
    }

    Ok(Json(BatchDetail { batch, images }))
}

/// Accept one or more photos, store them, and queue each for OCR.
async fn upload_images(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Vec<ImageView>>> {
    require_admin(&state, &jar).await?;

    let batches = BatchRepository::new(&state.pool);
    batches
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No batch: {}", id)))?;

    let images = ImageRepository::new(&state.pool);
    let jobs = JobRepository::new(&state.pool);
    let mut created = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;

        if data.is_empty() {
            return Err(AppError::BadRequest(format!("Empty file: {}", file_name)));
        }

        let saved = state.storage.save(&data, &file_name, &content_type).await?;
        let image = images
            .create(&NewImage {
                batch_id: id.clone(),
                storage_path: saved.storage_path,
                thumb_path: saved.thumb_path,
            })
            .await?;

        jobs.create(&image.id).await?;
        state.queue.enqueue(&image.id);

        created.push(image_view(&state, image).await?);
    }

    if created.is_empty() {
        return Err(AppError::BadRequest("No files in upload".to_string()));
    }

    info!("Queued {} image(s) for batch {}", created.len(), id);
    Ok(Json(created))
}
