use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::{get, post},
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use futures::future::join_all;
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

const ENTITY: &str = "Committee";
const NAME_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 2000;
const COLUMNS: &str = "id, name, description, logo_url, created_at, updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/committees", get(list_committees).post(create_committee))
        .route(
            "/committees/:id",
            get(get_committee)
                .put(update_committee)
                .delete(delete_committee),
        )
        .route("/committees/:id/logo", post(upload_logo))
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommitteeRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub logo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeDto {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub logo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommitteeDto {
    pub fn from_row(row: CommitteeRow, blobs: &dyn BlobStore) -> Self {
        Self {
            logo_url: resolve_url(blobs, row.logo_url.as_deref()),
            id: row.id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteePayload {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
}

/// Validated committee fields; absent optionals overwrite stored values.
struct CommitteeInput {
    name: String,
    description: String,
    logo_url: Option<String>,
}

impl CommitteePayload {
    fn validate(&self) -> AppResult<CommitteeInput> {
        Ok(CommitteeInput {
            name: require_text(&self.name, "Name", NAME_MAX)?,
            description: optional_text(self.description.as_deref(), "Description", DESCRIPTION_MAX)?
                .unwrap_or_default(),
            logo_url: optional_text(self.logo_url.as_deref(), "Logo URL", 2048)?,
        })
    }
}

pub async fn list_committees(State(state): State<AppState>) -> AppResult<Json<Vec<CommitteeDto>>> {
    let rows = fetch_committees(state.pool_ref()).await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| CommitteeDto::from_row(row, state.blobs()))
            .collect(),
    ))
}

pub async fn get_committee(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<CommitteeDto>> {
    let row = fetch_committee(state.pool_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;
    Ok(Json(CommitteeDto::from_row(row, state.blobs())))
}

pub async fn create_committee(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiJson(payload): ApiJson<CommitteePayload>,
) -> AppResult<Json<CommitteeDto>> {
    let input = payload.validate()?;
    let row = insert_committee(state.pool_ref(), &input).await?;
    info!(committee_id = %row.id, "committee created");
    Ok(Json(CommitteeDto::from_row(row, state.blobs())))
}

pub async fn update_committee(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<CommitteePayload>,
) -> AppResult<Json<CommitteeDto>> {
    let input = payload.validate()?;
    let row = update_committee_row(state.pool_ref(), id, &input)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;
    Ok(Json(CommitteeDto::from_row(row, state.blobs())))
}

/// Deletes the committee with its executives, blog posts and event links,
/// then cleans up the images those rows referenced.
pub async fn delete_committee(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<ApiMessage>> {
    let pool = state.pool_ref();
    let images = fetch_owned_images(pool, id).await?;

    let result = sqlx::query("DELETE FROM committees WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(ENTITY, id));
    }

    join_all(
        images
            .iter()
            .map(|image| discard_owned_blob(state.blobs(), &image.stored, &image.folder)),
    )
    .await;
    info!(committee_id = %id, images = images.len(), "committee deleted");
    Ok(Json(ApiMessage::new("Committee deleted successfully.")))
}

pub async fn upload_logo(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<Json<CommitteeDto>> {
    let file = state.uploads().single(multipart, FILE_FIELD).await?;

    let pool = state.pool_ref();
    let existing = fetch_committee(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;

    let slot = ImageSlot {
        entity: ENTITY,
        kind: "committees",
        id,
        role: "logo",
    };
    let row = replace_image(&state, slot, file, existing.logo_url, |path| async move {
        set_logo(pool, id, &path).await
    })
    .await?;

    info!(committee_id = %id, "committee logo replaced");
    Ok(Json(CommitteeDto::from_row(row, state.blobs())))
}

pub async fn fetch_committees(pool: &PgPool) -> sqlx::Result<Vec<CommitteeRow>> {
    sqlx::query_as::<_, CommitteeRow>(&format!(
        "SELECT {COLUMNS} FROM committees ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await
}

pub async fn fetch_committee(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<CommitteeRow>> {
    sqlx::query_as::<_, CommitteeRow>(&format!("SELECT {COLUMNS} FROM committees WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

async fn insert_committee(pool: &PgPool, input: &CommitteeInput) -> sqlx::Result<CommitteeRow> {
    sqlx::query_as::<_, CommitteeRow>(&format!(
        "INSERT INTO committees (id, name, description, logo_url) VALUES ($1, $2, $3, $4)
         RETURNING {COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&input.name)
    .bind(&input.description)
    .bind(&input.logo_url)
    .fetch_one(pool)
    .await
}

async fn update_committee_row(
    pool: &PgPool,
    id: Uuid,
    input: &CommitteeInput,
) -> sqlx::Result<Option<CommitteeRow>> {
    sqlx::query_as::<_, CommitteeRow>(&format!(
        "UPDATE committees SET name = $2, description = $3, logo_url = $4, updated_at = NOW()
         WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(&input.logo_url)
    .fetch_optional(pool)
    .await
}

async fn set_logo(pool: &PgPool, id: Uuid, path: &str) -> sqlx::Result<Option<CommitteeRow>> {
    sqlx::query_as::<_, CommitteeRow>(&format!(
        "UPDATE committees SET logo_url = $2, updated_at = NOW() WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(path)
    .fetch_optional(pool)
    .await
}

/// An image reference together with the upload folder of the row holding it.
#[derive(Debug, sqlx::FromRow)]
struct OwnedImage {
    folder: String,
    stored: String,
}

/// Image references removed together with the committee by cascade.
async fn fetch_owned_images(pool: &PgPool, id: Uuid) -> sqlx::Result<Vec<OwnedImage>> {
    sqlx::query_as::<_, OwnedImage>(
        "SELECT 'committees/' || id::text || '/logo' AS folder, logo_url AS stored
         FROM committees WHERE id = $1 AND logo_url IS NOT NULL
         UNION ALL
         SELECT 'executives/' || id::text || '/portrait', image_url
         FROM executives WHERE committee_id = $1 AND image_url IS NOT NULL
         UNION ALL
         SELECT 'blogposts/' || id::text || '/cover', cover_image_url
         FROM blog_posts WHERE committee_id = $1 AND cover_image_url IS NOT NULL",
    )
    .bind(id)
    .fetch_all(pool)
    .await
}
