//! Application state management

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::queue::OcrQueue;
use crate::storage::StorageBackend;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub storage: Arc<dyn StorageBackend>,
    pub queue: OcrQueue,
    session_key: Key,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        storage: Arc<dyn StorageBackend>,
        queue: OcrQueue,
    ) -> Self {
        let session_key = Key::derive_from(config.auth.session_secret.as_bytes());
        Self {
            config,
            pool,
            storage,
            queue,
            session_key,
        }
    }
}

// Lets SignedCookieJar pull its signing key out of the state.
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.session_key.clone()
    }
}
