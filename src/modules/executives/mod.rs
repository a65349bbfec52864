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

const ENTITY: &str = "Executive";
const FIELD_MAX: usize = 100;

// Executives are always read together with their committee's name.
const SELECT_JOINED: &str = "SELECT e.id, e.committee_id, c.name AS committee_name, e.first_name,
        e.last_name, e.role, e.image_url, e.created_at, e.updated_at
    FROM executives e JOIN committees c ON c.id = e.committee_id";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/executives", get(list_executives).post(create_executive))
        .route(
            "/executives/:id",
            get(get_executive)
                .put(update_executive)
                .delete(delete_executive),
        )
        .route(
            "/executives/committee/:committee_id",
            get(list_committee_executives),
        )
        .route("/executives/:id/portrait", post(upload_portrait))
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutiveRow {
    pub id: Uuid,
    pub committee_id: Uuid,
    pub committee_name: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutiveDto {
    pub id: Uuid,
    pub committee_id: Uuid,
    pub committee_name: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutiveDto {
    fn from_row(row: ExecutiveRow, blobs: &dyn BlobStore) -> Self {
        Self {
            image_url: resolve_url(blobs, row.image_url.as_deref()),
            id: row.id,
            committee_id: row.committee_id,
            committee_name: row.committee_name,
            first_name: row.first_name,
            last_name: row.last_name,
            role: row.role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutivePayload {
    pub committee_id: Uuid,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role: String,
    pub image_url: Option<String>,
}

struct ExecutiveInput {
    committee_id: Uuid,
    first_name: String,
    last_name: String,
    role: String,
    image_url: Option<String>,
}

impl ExecutivePayload {
    fn validate(&self) -> AppResult<ExecutiveInput> {
        Ok(ExecutiveInput {
            committee_id: self.committee_id,
            first_name: require_text(&self.first_name, "First name", FIELD_MAX)?,
            last_name: require_text(&self.last_name, "Last name", FIELD_MAX)?,
            role: require_text(&self.role, "Role", FIELD_MAX)?,
            image_url: optional_text(self.image_url.as_deref(), "Image URL", 2048)?,
        })
    }
}

fn to_dtos(rows: Vec<ExecutiveRow>, blobs: &dyn BlobStore) -> Vec<ExecutiveDto> {
    rows.into_iter()
        .map(|row| ExecutiveDto::from_row(row, blobs))
        .collect()
}

fn portrait_slot(id: Uuid) -> ImageSlot<'static> {
    ImageSlot {
        entity: ENTITY,
        kind: "executives",
        id,
        role: "portrait",
    }
}

fn unknown_committee(committee_id: Uuid) -> String {
    format!("Committee with ID {committee_id} does not exist.")
}

pub async fn list_executives(State(state): State<AppState>) -> AppResult<Json<Vec<ExecutiveDto>>> {
    let rows = sqlx::query_as::<_, ExecutiveRow>(&format!(
        "{SELECT_JOINED} ORDER BY e.created_at DESC"
    ))
    .fetch_all(state.pool_ref())
    .await?;
    Ok(Json(to_dtos(rows, state.blobs())))
}

pub async fn list_committee_executives(
    State(state): State<AppState>,
    ApiPath(committee_id): ApiPath<Uuid>,
) -> AppResult<Json<Vec<ExecutiveDto>>> {
    let rows = sqlx::query_as::<_, ExecutiveRow>(&format!(
        "{SELECT_JOINED} WHERE e.committee_id = $1 ORDER BY e.created_at DESC"
    ))
    .bind(committee_id)
    .fetch_all(state.pool_ref())
    .await?;
    Ok(Json(to_dtos(rows, state.blobs())))
}

pub async fn get_executive(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<ExecutiveDto>> {
    let row = fetch_executive(state.pool_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;
    Ok(Json(ExecutiveDto::from_row(row, state.blobs())))
}

pub async fn create_executive(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiJson(payload): ApiJson<ExecutivePayload>,
) -> AppResult<Json<ExecutiveDto>> {
    let input = payload.validate()?;
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO executives (id, committee_id, first_name, last_name, role, image_url)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id)
    .bind(input.committee_id)
    .bind(&input.first_name)
    .bind(&input.last_name)
    .bind(&input.role)
    .bind(&input.image_url)
    .execute(state.pool_ref())
    .await
    .map_err(|err| AppError::from_write(err, unknown_committee(input.committee_id)))?;

    let row = fetch_executive(state.pool_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;
    info!(executive_id = %id, "executive created");
    Ok(Json(ExecutiveDto::from_row(row, state.blobs())))
}

pub async fn update_executive(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<ExecutivePayload>,
) -> AppResult<Json<ExecutiveDto>> {
    let input = payload.validate()?;

    let result = sqlx::query(
        "UPDATE executives
         SET committee_id = $2, first_name = $3, last_name = $4, role = $5, image_url = $6,
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(input.committee_id)
    .bind(&input.first_name)
    .bind(&input.last_name)
    .bind(&input.role)
    .bind(&input.image_url)
    .execute(state.pool_ref())
    .await
    .map_err(|err| AppError::from_write(err, unknown_committee(input.committee_id)))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(ENTITY, id));
    }

    let row = fetch_executive(state.pool_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;
    Ok(Json(ExecutiveDto::from_row(row, state.blobs())))
}

pub async fn delete_executive(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<ApiMessage>> {
    let image: Option<Option<String>> =
        sqlx::query_scalar("DELETE FROM executives WHERE id = $1 RETURNING image_url")
            .bind(id)
            .fetch_optional(state.pool_ref())
            .await?;

    let Some(image) = image else {
        return Err(AppError::not_found(ENTITY, id));
    };
    if let Some(image) = image {
        discard_owned_blob(state.blobs(), &image, &portrait_slot(id).folder()).await;
    }

    Ok(Json(ApiMessage::new("Executive deleted successfully.")))
}

pub async fn upload_portrait(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<Json<ExecutiveDto>> {
    let file = state.uploads().single(multipart, FILE_FIELD).await?;

    let pool = state.pool_ref();
    let existing = fetch_executive(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;

    let slot = portrait_slot(id);
    replace_image(&state, slot, file, existing.image_url, |path| async move {
        sqlx::query_scalar::<_, Uuid>(
            "UPDATE executives SET image_url = $2, updated_at = NOW() WHERE id = $1 RETURNING id",
        )
        .bind(id)
        .bind(path)
        .fetch_optional(pool)
        .await
    })
    .await?;

    let row = fetch_executive(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;
    Ok(Json(ExecutiveDto::from_row(row, state.blobs())))
}

async fn fetch_executive(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<ExecutiveRow>> {
    sqlx::query_as::<_, ExecutiveRow>(&format!("{SELECT_JOINED} WHERE e.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}
