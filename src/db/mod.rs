//! SQLite persistence layer
//!
//! Repositories follow a shared pattern: borrowed pool, TEXT uuid primary
//! keys, RFC 3339 TEXT timestamps, `CREATE TABLE IF NOT EXISTS` init.

mod batches;
mod checkouts;
mod images;
mod jobs;
mod users;

pub use batches::{Batch, BatchRepository};
pub use checkouts::{Book, BookRepository, Checkout, CheckoutExportRow, CheckoutRepository};
pub use images::{Image, ImageRepository, NewImage};
pub use jobs::{JobRepository, OcrJob};
pub use users::{User, UserRepository};

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

/// Create a connection pool, creating the database file if needed, and
/// initialize the schema.
pub async fn create_pool(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create every table. Idempotent.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    UserRepository::new(pool).init().await?;
    BatchRepository::new(pool).init().await?;
    ImageRepository::new(pool).init().await?;
    JobRepository::new(pool).init().await?;
    BookRepository::new(pool).init().await?;
    CheckoutRepository::new(pool).init().await?;
    Ok(())
}

/// Image lifecycle status.
///
/// Moves only forward: pending -> ocr_done -> checked_out. Checked-out is
/// terminal; the OCR pipeline never regresses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    OcrDone,
    CheckedOut,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::OcrDone => "ocr_done",
            Self::CheckedOut => "checked_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ocr_done" => Some(Self::OcrDone),
            "checked_out" => Some(Self::CheckedOut),
            _ => None,
        }
    }
}

/// OCR job status.
///
/// queued -> working -> done | error. Both done and error are terminal for
/// a job row; retrying means creating a fresh queued row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Working,
    Error,
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Working => "working",
            Self::Error => "error",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "working" => Some(Self::Working),
            "error" => Some(Self::Error),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}
