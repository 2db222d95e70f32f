//! Uploaded image storage

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::ImageStatus;
use crate::error::{AppError, Result};

/// One uploaded spine photograph
#[derive(Debug, Clone, Serialize)]
pub struct Image {
    pub id: String,
    pub batch_id: String,
    pub storage_path: String,
    pub thumb_path: Option<String>,
    pub ocr_text: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub status: ImageStatus,
    pub created_at: String,
}

/// Fields required to insert a new image
#[derive(Debug, Clone)]
pub struct NewImage {
    pub batch_id: String,
    pub storage_path: String,
    pub thumb_path: Option<String>,
}

/// Image repository
pub struct ImageRepository<'a> {
    pool: &'a SqlitePool,
}

const SELECT_COLUMNS: &str =
    "id, batch_id, storage_path, thumb_path, ocr_text, title, author, status, created_at";

impl<'a> ImageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                thumb_path TEXT,
                ocr_text TEXT,
                title TEXT,
                author TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_images_batch ON images(batch_id);
            CREATE INDEX IF NOT EXISTS idx_images_status ON images(status);
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new image in pending state.
    pub async fn create(&self, new: &NewImage) -> Result<Image> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO images (id, batch_id, storage_path, thumb_path, status, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&id)
        .bind(&new.batch_id)
        .bind(&new.storage_path)
        .bind(&new.thumb_path)
        .bind(&now)
        .execute(self.pool)
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created image".to_string()))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Image>> {
        let row = sqlx::query_as::<_, ImageRow>(&format!(
            "SELECT {} FROM images WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_image()).transpose()
    }

    /// List a batch's images in upload order.
    pub async fn list_for_batch(&self, batch_id: &str) -> Result<Vec<Image>> {
        let rows = sqlx::query_as::<_, ImageRow>(&format!(
            "SELECT {} FROM images WHERE batch_id = ? ORDER BY created_at ASC, rowid ASC",
            SELECT_COLUMNS
        ))
        .bind(batch_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_image()).collect()
    }

    /// Patch title/author. Absent fields keep their current value.
    /// Returns None if the image does not exist.
    pub async fn update_details(
        &self,
        id: &str,
        title: Option<&str>,
        author: Option<&str>,
    ) -> Result<Option<Image>> {
        let result = sqlx::query(
            r#"
            UPDATE images
            SET title = COALESCE(?, title),
                author = COALESCE(?, author)
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(author)
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    /// Finalize an image: set the checked-out title/author and mark it
    /// consumed. Checked-out is terminal.
    pub async fn mark_checked_out(&self, id: &str, title: &str, author: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE images
            SET status = 'checked_out', title = ?, author = ?
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(author)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}

/// Internal row type for SQLite queries
#[derive(sqlx::FromRow)]
struct ImageRow {
    id: String,
    batch_id: String,
    storage_path: String,
    thumb_path: Option<String>,
    ocr_text: Option<String>,
    title: Option<String>,
    author: Option<String>,
    status: String,
    created_at: String,
}

impl ImageRow {
    fn into_image(self) -> Result<Image> {
        let status = ImageStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(format!("Unknown image status '{}'", self.status))
        })?;

        Ok(Image {
            id: self.id,
            batch_id: self.batch_id,
            storage_path: self.storage_path,
            thumb_path: self.thumb_path,
            ocr_text: self.ocr_text,
            title: self.title,
            author: self.author,
            status,
            created_at: self.created_at,
        })
    }
}
