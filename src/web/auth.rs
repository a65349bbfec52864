use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    Json, Router,
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    routing::post,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use chrono::{DateTime, Utc};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::web::{ApiJson, ApiMessage, AppError, AppResult, AppState};

const INVALID_CREDENTIALS: &str = "Invalid username or password.";
const MIN_PASSWORD_LEN: usize = 6;
const MAX_PASSWORD_LEN: usize = 100;

#[derive(Clone, sqlx::FromRow)]
pub struct AdminRow {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
}

/// Administrator identity taken from a verified bearer token.
#[derive(Clone, Debug)]
pub struct AuthAdmin {
    pub id: Uuid,
    pub username: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> AppResult<Self> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized("Missing or malformed bearer token."))?;

        let claims = state.tokens().verify(bearer.token()).map_err(|err| {
            warn!(?err, "rejected admin token");
            AppError::unauthorized("Invalid or expired token.")
        })?;

        Ok(AuthAdmin {
            id: claims.sub,
            username: claims.name,
        })
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/change-password", post(change_password))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(form): ApiJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let username = form.username.trim();
    if username.is_empty() {
        return Err(AppError::bad_request("Username is required."));
    }
    if form.password.is_empty() {
        return Err(AppError::bad_request("Password is required."));
    }

    // Unknown usernames and wrong passwords produce the same response.
    let admin = fetch_admin_by_username(state.pool_ref(), username)
        .await?
        .filter(|admin| verify_password(&form.password, &admin.password_hash))
        .ok_or_else(|| AppError::unauthorized(INVALID_CREDENTIALS))?;

    let issued = state.tokens().issue(admin.id, &admin.username, Utc::now())?;
    info!(admin = %admin.username, "admin logged in");

    Ok(Json(LoginResponse {
        token: issued.token,
        username: admin.username,
        expires_at: issued.expires_at,
    }))
}

pub async fn change_password(
    State(state): State<AppState>,
    caller: AuthAdmin,
    ApiJson(form): ApiJson<ChangePasswordRequest>,
) -> AppResult<Json<ApiMessage>> {
    if form.current_password.is_empty() {
        return Err(AppError::bad_request("Current password is required."));
    }
    let new_len = form.new_password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&new_len) {
        return Err(AppError::bad_request(format!(
            "New password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters."
        )));
    }

    let admin = fetch_admin_by_id(state.pool_ref(), caller.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Admin not found.".to_string()))?;

    if !verify_password(&form.current_password, &admin.password_hash) {
        warn!(admin = %caller.username, "password change with wrong current password");
        return Err(AppError::bad_request("Current password is incorrect."));
    }

    let password_hash = hash_password(&form.new_password)
        .map_err(|err| anyhow::anyhow!("failed to hash new password: {err}"))?;

    if !update_admin_password(state.pool_ref(), admin.id, &password_hash).await? {
        return Err(anyhow::anyhow!("password update affected no rows").into());
    }

    info!(admin = %admin.username, "admin password changed");
    Ok(Json(ApiMessage::new("Password changed successfully.")))
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub async fn fetch_admin_by_username(
    pool: &PgPool,
    username: &str,
) -> sqlx::Result<Option<AdminRow>> {
    sqlx::query_as::<_, AdminRow>(
        "SELECT id, username, password_hash FROM admins WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_admin_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<AdminRow>> {
    sqlx::query_as::<_, AdminRow>("SELECT id, username, password_hash FROM admins WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn update_admin_password(
    pool: &PgPool,
    id: Uuid,
    password_hash: &str,
) -> sqlx::Result<bool> {
    let result =
        sqlx::query("UPDATE admins SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::{
        storage::testing::MemoryBlobStore,
        web::testing::{TEST_ADMIN, TestDb, json_request, send},
    };

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("s3cret-pass").expect("hash");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong-pass", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("same").expect("hash");
        let second = hash_password("same").expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("", ""));
    }

    #[tokio::test]
    async fn changed_password_replaces_the_old_one() {
        let Some(db) = TestDb::connect(Arc::new(MemoryBlobStore::default())).await else {
            return;
        };
        let (username, password) = TEST_ADMIN;
        let login = |password: &str| {
            json_request(
                Method::POST,
                "/auth/login",
                None,
                json!({"username": username, "password": password}),
            )
        };

        let (status, session) = send(&db.app, login(password)).await;
        assert_eq!(status, StatusCode::OK);
        let token = format!("Bearer {}", session["token"].as_str().expect("token"));

        let change = json_request(
            Method::POST,
            "/auth/change-password",
            Some(&token),
            json!({"currentPassword": password, "newPassword": "fresh-pass-42"}),
        );
        let (status, _) = send(&db.app, change).await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(send(&db.app, login(password)).await.0, StatusCode::UNAUTHORIZED);
        let (status, session) = send(&db.app, login("fresh-pass-42")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["username"], username);

        db.drop_schema().await;
    }
}
