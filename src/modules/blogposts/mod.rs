use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::{get, post},
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::{
    media::{FILE_FIELD, ImageSlot, replace_image},
    optional_text, require_text,
};
use crate::{
    storage::{BlobStore, discard_owned_blob, resolve_url},
    web::{ApiJson, ApiMessage, ApiPath, AppError, AppResult, AppState, AuthAdmin},
};

const ENTITY: &str = "Blog post";
const TITLE_MAX: usize = 200;
const CONTENT_MAX: usize = 100_000;
const RECENT_LIMIT: i64 = 8;
const COLUMNS: &str = "id, committee_id, title, content, cover_image_url, created_at, updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/blogposts", get(list_posts).post(create_post))
        .route("/blogposts/last8", get(recent_posts))
        .route(
            "/blogposts/committee/:committee_id",
            get(list_committee_posts),
        )
        .route(
            "/blogposts/:id",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/blogposts/:id/cover", post(upload_cover))
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlogPostRow {
    pub id: Uuid,
    pub committee_id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub cover_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPostDto {
    pub id: Uuid,
    pub committee_id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub cover_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlogPostDto {
    fn from_row(row: BlogPostRow, blobs: &dyn BlobStore) -> Self {
        Self {
            cover_image_url: resolve_url(blobs, row.cover_image_url.as_deref()),
            id: row.id,
            committee_id: row.committee_id,
            title: row.title,
            content: row.content,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPostPayload {
    pub committee_id: Uuid,
    #[serde(default)]
    pub title: String,
    pub content: Option<String>,
    pub cover_image_url: Option<String>,
}

struct BlogPostInput {
    committee_id: Uuid,
    title: String,
    content: Option<String>,
    cover_image_url: Option<String>,
}

impl BlogPostPayload {
    fn validate(&self) -> AppResult<BlogPostInput> {
        let content = match self.content.as_deref() {
            Some(content) if content.chars().count() > CONTENT_MAX => {
                return Err(AppError::bad_request(format!(
                    "Content must be at most {CONTENT_MAX} characters."
                )));
            }
            Some(content) if content.trim().is_empty() => None,
            other => other.map(str::to_string),
        };

        Ok(BlogPostInput {
            committee_id: self.committee_id,
            title: require_text(&self.title, "Title", TITLE_MAX)?,
            content,
            cover_image_url: optional_text(self.cover_image_url.as_deref(), "Cover image URL", 2048)?,
        })
    }
}

fn to_dtos(rows: Vec<BlogPostRow>, blobs: &dyn BlobStore) -> Vec<BlogPostDto> {
    rows.into_iter()
        .map(|row| BlogPostDto::from_row(row, blobs))
        .collect()
}

fn cover_slot(id: Uuid) -> ImageSlot<'static> {
    ImageSlot {
        entity: ENTITY,
        kind: "blogposts",
        id,
        role: "cover",
    }
}

fn unknown_committee(committee_id: Uuid) -> String {
    format!("Committee with ID {committee_id} does not exist.")
}

pub async fn list_posts(State(state): State<AppState>) -> AppResult<Json<Vec<BlogPostDto>>> {
    let rows = sqlx::query_as::<_, BlogPostRow>(&format!(
        "SELECT {COLUMNS} FROM blog_posts ORDER BY created_at DESC"
    ))
    .fetch_all(state.pool_ref())
    .await?;
    Ok(Json(to_dtos(rows, state.blobs())))
}

/// The newest posts, capped at eight.
pub async fn recent_posts(State(state): State<AppState>) -> AppResult<Json<Vec<BlogPostDto>>> {
    let rows = sqlx::query_as::<_, BlogPostRow>(&format!(
        "SELECT {COLUMNS} FROM blog_posts ORDER BY created_at DESC, id DESC LIMIT $1"
    ))
    .bind(RECENT_LIMIT)
    .fetch_all(state.pool_ref())
    .await?;
    Ok(Json(to_dtos(rows, state.blobs())))
}

pub async fn list_committee_posts(
    State(state): State<AppState>,
    ApiPath(committee_id): ApiPath<Uuid>,
) -> AppResult<Json<Vec<BlogPostDto>>> {
    let rows = sqlx::query_as::<_, BlogPostRow>(&format!(
        "SELECT {COLUMNS} FROM blog_posts WHERE committee_id = $1 ORDER BY created_at DESC"
    ))
    .bind(committee_id)
    .fetch_all(state.pool_ref())
    .await?;
    Ok(Json(to_dtos(rows, state.blobs())))
}

pub async fn get_post(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<BlogPostDto>> {
    let row = fetch_post(state.pool_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;
    Ok(Json(BlogPostDto::from_row(row, state.blobs())))
}

pub async fn create_post(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiJson(payload): ApiJson<BlogPostPayload>,
) -> AppResult<Json<BlogPostDto>> {
    let input = payload.validate()?;

    let row = sqlx::query_as::<_, BlogPostRow>(&format!(
        "INSERT INTO blog_posts (id, committee_id, title, content, cover_image_url)
         VALUES ($1, $2, $3, $4, $5) RETURNING {COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.committee_id)
    .bind(&input.title)
    .bind(&input.content)
    .bind(&input.cover_image_url)
    .fetch_one(state.pool_ref())
    .await
    .map_err(|err| AppError::from_write(err, unknown_committee(input.committee_id)))?;

    info!(post_id = %row.id, "blog post created");
    Ok(Json(BlogPostDto::from_row(row, state.blobs())))
}

pub async fn update_post(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<BlogPostPayload>,
) -> AppResult<Json<BlogPostDto>> {
    let input = payload.validate()?;

    let row = sqlx::query_as::<_, BlogPostRow>(&format!(
        "UPDATE blog_posts
         SET committee_id = $2, title = $3, content = $4, cover_image_url = $5, updated_at = NOW()
         WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(input.committee_id)
    .bind(&input.title)
    .bind(&input.content)
    .bind(&input.cover_image_url)
    .fetch_optional(state.pool_ref())
    .await
    .map_err(|err| AppError::from_write(err, unknown_committee(input.committee_id)))?
    .ok_or_else(|| AppError::not_found(ENTITY, id))?;

    Ok(Json(BlogPostDto::from_row(row, state.blobs())))
}

pub async fn delete_post(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<ApiMessage>> {
    let cover: Option<Option<String>> =
        sqlx::query_scalar("DELETE FROM blog_posts WHERE id = $1 RETURNING cover_image_url")
            .bind(id)
            .fetch_optional(state.pool_ref())
            .await?;

    let Some(cover) = cover else {
        return Err(AppError::not_found(ENTITY, id));
    };
    if let Some(cover) = cover {
        discard_owned_blob(state.blobs(), &cover, &cover_slot(id).folder()).await;
    }

    Ok(Json(ApiMessage::new("Blog post deleted successfully.")))
}

pub async fn upload_cover(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<Json<BlogPostDto>> {
    let file = state.uploads().single(multipart, FILE_FIELD).await?;

    let pool = state.pool_ref();
    let existing = fetch_post(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;

    let slot = cover_slot(id);
    let row = replace_image(&state, slot, file, existing.cover_image_url, |path| async move {
        sqlx::query_as::<_, BlogPostRow>(&format!(
            "UPDATE blog_posts SET cover_image_url = $2, updated_at = NOW()
             WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(path)
        .fetch_optional(pool)
        .await
    })
    .await?;

    info!(post_id = %id, "blog post cover replaced");
    Ok(Json(BlogPostDto::from_row(row, state.blobs())))
}

async fn fetch_post(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<BlogPostRow>> {
    sqlx::query_as::<_, BlogPostRow>(&format!("SELECT {COLUMNS} FROM blog_posts WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::{storage::testing::MemoryBlobStore, web::testing::TestDb};

    fn payload(title: &str, content: Option<&str>) -> BlogPostPayload {
        BlogPostPayload {
            committee_id: Uuid::new_v4(),
            title: title.to_string(),
            content: content.map(str::to_string),
            cover_image_url: None,
        }
    }

    #[test]
    fn title_is_required() {
        assert!(payload("", Some("body")).validate().is_err());
    }

    #[test]
    fn blank_content_is_stored_as_null() {
        let input = payload("Hello", Some("   ")).validate().expect("valid");
        assert_eq!(input.content, None);
    }

    #[test]
    fn content_is_kept_verbatim() {
        let input = payload("Hello", Some("  indented\nbody ")).validate().expect("valid");
        assert_eq!(input.content.as_deref(), Some("  indented\nbody "));
    }

    #[test]
    fn missing_committee_id_fails_to_parse() {
        assert!(serde_json::from_str::<BlogPostPayload>(r#"{"title":"Hello"}"#).is_err());
    }

    #[tokio::test]
    async fn last8_returns_the_newest_eight() {
        let Some(db) = TestDb::connect(Arc::new(MemoryBlobStore::default())).await else {
            return;
        };

        let committee = db.create("/committees", json!({"name": "Press"})).await;
        for index in 0..10 {
            db.create(
                "/blogposts",
                json!({"committeeId": committee, "title": format!("Post {index}")}),
            )
            .await;
        }

        let (status, body) = db.get("/blogposts/last8").await;
        assert_eq!(status, StatusCode::OK);
        let titles: Vec<&str> = body
            .as_array()
            .expect("posts")
            .iter()
            .map(|post| post["title"].as_str().expect("title"))
            .collect();
        let expected: Vec<String> = (2..10).rev().map(|index| format!("Post {index}")).collect();
        assert_eq!(titles, expected);

        db.drop_schema().await;
    }

    #[tokio::test]
    async fn unknown_committee_is_a_bad_request_and_missing_post_is_not_found() {
        let Some(db) = TestDb::connect(Arc::new(MemoryBlobStore::default())).await else {
            return;
        };

        let body = json!({"committeeId": Uuid::new_v4(), "title": "Orphan"});
        let (status, _) = db.post("/blogposts", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let committee = db.create("/committees", json!({"name": "Press"})).await;
        let (status, _) = db
            .put(
                &format!("/blogposts/{}", Uuid::new_v4()),
                json!({"committeeId": committee, "title": "Ghost"}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        db.drop_schema().await;
    }
}
