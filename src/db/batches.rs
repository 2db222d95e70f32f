//! Upload batch storage

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// A named group of images uploaded together by one administrator
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Batch {
    pub id: String,
    pub admin_id: String,
    pub created_at: String,
}

/// Batch repository
pub struct BatchRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BatchRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                admin_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_batches_admin ON batches(admin_id);
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn create(&self, admin_id: &str) -> Result<Batch> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO batches (id, admin_id, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(admin_id)
            .bind(&now)
            .execute(self.pool)
            .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created batch".to_string()))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Batch>> {
        let batch = sqlx::query_as::<_, Batch>(
            "SELECT id, admin_id, created_at FROM batches WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(batch)
    }

    /// List all batches, newest first.
    pub async fn list(&self) -> Result<Vec<Batch>> {
        let batches = sqlx::query_as::<_, Batch>(
            "SELECT id, admin_id, created_at FROM batches ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(batches)
    }
}
