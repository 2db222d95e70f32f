//! Session authentication routes
//!
//! Cookie sessions signed with the server secret. The cookie value is just
//! the user id; the signature keeps it tamper-proof.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde::Deserialize;

use crate::db::{User, UserRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

const SESSION_COOKIE: &str = "spinescan_session";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

/// Resolve the session cookie to a user, rejecting non-admins.
///
/// Every catalog route goes through this; there is no read-only public
/// surface.
pub async fn require_admin(state: &AppState, jar: &SignedCookieJar) -> Result<User> {
    let user_id = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::Unauthorized("Not logged in".to_string()))?;

    let user = UserRepository::new(&state.pool)
        .get(&user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Session is no longer valid".to_string()))?;

    if !user.is_admin {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }
    Ok(user)
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(SignedCookieJar, Json<User>)> {
    let user = UserRepository::new(&state.pool)
        .find_by_email(&body.email)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid email or password".to_string()))?;

    let valid = bcrypt::verify(&body.password, &user.password_hash)
        .map_err(|e| AppError::Internal(format!("Failed to verify password: {}", e)))?;
    if !valid {
        return Err(AppError::Unauthorized("Invalid email or password".to_string()));
    }

    let cookie = Cookie::build((SESSION_COOKIE, user.id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);

    Ok((jar.add(cookie), Json(user)))
}

async fn logout(jar: SignedCookieJar) -> (SignedCookieJar, Json<serde_json::Value>) {
    let cookie = Cookie::build(SESSION_COOKIE).path("/");
    (
        jar.remove(cookie),
        Json(serde_json::json!({ "ok": true })),
    )
}

async fn me(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Json<User>> {
    let user = require_admin(&state, &jar).await?;
    Ok(Json(user))
}
