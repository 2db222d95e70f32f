//! Configuration management for the SpineScan server

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub ocr: OcrConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Browser origin allowed to call the API with credentials.
    pub cors_origin: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Which backend stores the uploaded originals and thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDriver {
    Local,
    S3,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub driver: StorageDriver,
    /// Root directory for the local driver.
    pub local_dir: PathBuf,
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Base URL prepended to object keys when serving public links.
    pub public_url: Option<String>,
}

/// Which backend turns spine photos into text. Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrProviderKind {
    /// Local tesseract CLI.
    Tesseract,
    /// Hosted vision-language model (OpenAI-compatible chat API).
    Vision,
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub provider: OcrProviderKind,
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub language: String,
    /// Upper bound on a single OCR call; a hung backend must not block the
    /// queue forever.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub session_secret: String,
    pub seed_admin_email: Option<String>,
    pub seed_admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let session_secret =
            env::var("SESSION_SECRET").context("SESSION_SECRET is required")?;
        if session_secret.len() < 32 {
            bail!("SESSION_SECRET must be at least 32 characters");
        }

        let driver = match env::var("STORAGE_DRIVER")
            .unwrap_or_else(|_| "local".to_string())
            .as_str()
        {
            "s3" => StorageDriver::S3,
            _ => StorageDriver::Local,
        };

        let provider = match env::var("OCR_PROVIDER")
            .unwrap_or_else(|_| "tesseract".to_string())
            .as_str()
        {
            "openai" | "vision" => OcrProviderKind::Vision,
            _ => OcrProviderKind::Tesseract,
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "4000".to_string())
                    .parse()
                    .unwrap_or(4000),
                cors_origin: env::var("CORS_ORIGIN")
                    .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:./spinescan.db".to_string()),
            },
            storage: StorageConfig {
                driver,
                local_dir: env::var("UPLOADS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("uploads")),
                endpoint: env::var("S3_ENDPOINT").ok(),
                bucket: env::var("S3_BUCKET").ok(),
                region: env::var("S3_REGION").ok(),
                access_key: env::var("S3_ACCESS_KEY_ID").ok(),
                secret_key: env::var("S3_SECRET_ACCESS_KEY").ok(),
                public_url: env::var("S3_PUBLIC_URL").ok(),
            },
            ocr: OcrConfig {
                provider,
                api_key: env::var("OPENAI_API_KEY").ok(),
                api_base: env::var("OCR_API_BASE")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                model: env::var("OCR_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                language: env::var("OCR_LANGUAGE").unwrap_or_else(|_| "eng".to_string()),
                timeout_secs: env::var("OCR_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            },
            auth: AuthConfig {
                session_secret,
                seed_admin_email: env::var("SEED_ADMIN_EMAIL").ok(),
                seed_admin_password: env::var("SEED_ADMIN_PASSWORD").ok(),
            },
        })
    }
}
