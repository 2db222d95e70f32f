//! Book and checkout storage
//!
//! Checkout finalizes an image's title/author into a permanent book record.
//! Books are deduplicated on (title, author).

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// A cataloged book
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub created_at: String,
}

/// One checkout event linking an image to a book
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Checkout {
    pub id: String,
    pub image_id: String,
    pub book_id: String,
    pub admin_id: String,
    pub checked_out_at: String,
}

/// Flattened checkout row for the CSV export
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckoutExportRow {
    pub image_id: String,
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub admin_email: String,
    pub checked_out_at: String,
}

/// Book repository
pub struct BookRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BookRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(title, author)
            );
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Insert the book if (title, author) is new, then return the record.
    pub async fn upsert(&self, title: &str, author: &str) -> Result<Book> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO books (id, title, author, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(title, author) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(title)
        .bind(author)
        .bind(&now)
        .execute(self.pool)
        .await?;

        let book = sqlx::query_as::<_, Book>(
            "SELECT id, title, author, created_at FROM books WHERE title = ? AND author = ?",
        )
        .bind(title)
        .bind(author)
        .fetch_optional(self.pool)
        .await?;

        book.ok_or_else(|| AppError::Internal("Failed to fetch upserted book".to_string()))
    }
}

/// Checkout repository
pub struct CheckoutRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CheckoutRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkouts (
                id TEXT PRIMARY KEY,
                image_id TEXT NOT NULL,
                book_id TEXT NOT NULL,
                admin_id TEXT NOT NULL,
                checked_out_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_checkouts_book ON checkouts(book_id);
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn create(&self, image_id: &str, book_id: &str, admin_id: &str) -> Result<Checkout> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO checkouts (id, image_id, book_id, admin_id, checked_out_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(image_id)
        .bind(book_id)
        .bind(admin_id)
        .bind(&now)
        .execute(self.pool)
        .await?;

        let checkout = sqlx::query_as::<_, Checkout>(
            "SELECT id, image_id, book_id, admin_id, checked_out_at FROM checkouts WHERE id = ?",
        )
        .bind(&id)
        .fetch_optional(self.pool)
        .await?;

        checkout.ok_or_else(|| AppError::Internal("Failed to fetch created checkout".to_string()))
    }

    /// All checkouts joined with book and admin details, newest first.
    pub async fn export_rows(&self) -> Result<Vec<CheckoutExportRow>> {
        let rows = sqlx::query_as::<_, CheckoutExportRow>(
            r#"
            SELECT c.image_id, c.book_id, b.title, b.author,
                   u.email AS admin_email, c.checked_out_at
            FROM checkouts c
            JOIN books b ON b.id = c.book_id
            JOIN users u ON u.id = c.admin_id
            ORDER BY c.checked_out_at DESC, c.rowid DESC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRepository;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        UserRepository::new(&pool).init().await.unwrap();
        BookRepository::new(&pool).init().await.unwrap();
        CheckoutRepository::new(&pool).init().await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_upsert_deduplicates_on_title_author() {
        let pool = setup_test_db().await;
        let repo = BookRepository::new(&pool);

        let first = repo.upsert("Moby Dick", "Herman Melville").await.unwrap();
        let second = repo.upsert("Moby Dick", "Herman Melville").await.unwrap();
        assert_eq!(first.id, second.id);

        let other = repo.upsert("Moby Dick", "Someone Else").await.unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_export_rows_joins_details() {
        let pool = setup_test_db().await;
        let users = UserRepository::new(&pool);
        let books = BookRepository::new(&pool);
        let checkouts = CheckoutRepository::new(&pool);

        let admin = users.create("admin@example.com", "hash", true).await.unwrap();
        let book = books.upsert("Moby Dick", "Herman Melville").await.unwrap();
        checkouts.create("image-1", &book.id, &admin.id).await.unwrap();

        let rows = checkouts.export_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Moby Dick");
        assert_eq!(rows[0].admin_email, "admin@example.com");
        assert_eq!(rows[0].image_id, "image-1");
    }
}
