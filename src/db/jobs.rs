//! OCR job storage
//!
//! One row per processing attempt. The latest row for an image is the
//! authoritative one; superseded rows are ignored by the executor.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::JobStatus;
use crate::error::{AppError, Result};

/// One attempt to process a single image through the OCR pipeline
#[derive(Debug, Clone, Serialize)]
pub struct OcrJob {
    pub id: String,
    pub image_id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: String,
}

/// OCR job repository
pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ocr_jobs (
                id TEXT PRIMARY KEY,
                image_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                error TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ocr_jobs_image ON ocr_jobs(image_id);
            CREATE INDEX IF NOT EXISTS idx_ocr_jobs_status ON ocr_jobs(status);
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Insert a queued job for the image.
    pub async fn create(&self, image_id: &str) -> Result<OcrJob> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO ocr_jobs (id, image_id, status, created_at) VALUES (?, ?, 'queued', ?)",
        )
        .bind(&id)
        .bind(image_id)
        .bind(&now)
        .execute(self.pool)
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created job".to_string()))
    }

    pub async fn get(&self, id: &str) -> Result<Option<OcrJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, image_id, status, error, created_at FROM ocr_jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_job()).transpose()
    }

    /// The most recently created job for an image. This is the row the
    /// executor operates on, regardless of which enqueue triggered it.
    pub async fn latest_for_image(&self, image_id: &str) -> Result<Option<OcrJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, image_id, status, error, created_at
            FROM ocr_jobs
            WHERE image_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(image_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_job()).transpose()
    }

    /// Image ids of all queued jobs in creation order, for resumption at
    /// startup. Working jobs are deliberately excluded: a job left working
    /// by a crash stays stuck until an operator requeues it.
    ///
    /// Superseded rows show up here too: a queued row whose image already
    /// has a newer terminal row is still returned, so each restart
    /// re-enqueues it and the executor re-runs the latest row for that
    /// image (a harmless done -> working -> done flip).
    pub async fn queued_image_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT image_id FROM ocr_jobs WHERE status = 'queued' ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|(image_id,)| image_id).collect())
    }

    pub async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE ocr_jobs SET status = ?, error = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(())
    }
}

/// Internal row type for SQLite queries
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    image_id: String,
    status: String,
    error: Option<String>,
    created_at: String,
}

impl JobRow {
    fn into_job(self) -> Result<OcrJob> {
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown job status '{}'", self.status)))?;

        Ok(OcrJob {
            id: self.id,
            image_id: self.image_id,
            status,
            error: self.error,
            created_at: self.created_at,
        })
    }
}
