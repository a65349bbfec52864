use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::{delete, get},
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use super::{ENTITY, event_folder, fetch_event};
use crate::{
    modules::media::{FILE_FIELD, FILES_FIELD},
    storage::{BlobStore, discard_blob, discard_blobs, discard_owned_blob, resolve_url},
    web::{ApiMessage, ApiPath, AppError, AppResult, AppState, AuthAdmin},
};

pub(super) const COLUMNS: &str = "id, event_id, image_url, is_cover, created_at, updated_at";

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/events/:id/cover", get(get_cover).post(upload_cover))
        .route("/events/:id/photos", get(list_gallery).post(upload_gallery))
        .route("/events/:id/photos/:photo_id", delete(delete_photo))
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventPhotoRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub image_url: String,
    pub is_cover: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPhotoDto {
    pub id: Uuid,
    pub event_id: Uuid,
    pub image_url: String,
    pub is_cover: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventPhotoDto {
    pub fn from_row(row: EventPhotoRow, blobs: &dyn BlobStore) -> Self {
        Self {
            image_url: resolve_url(blobs, Some(&row.image_url)).unwrap_or_default(),
            id: row.id,
            event_id: row.event_id,
            is_cover: row.is_cover,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn cover_folder(event_id: Uuid) -> String {
    format!("{}/cover", event_folder(event_id))
}

fn gallery_folder(event_id: Uuid) -> String {
    format!("{}/photos", event_folder(event_id))
}

pub async fn get_cover(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<EventPhotoDto>> {
    let row = sqlx::query_as::<_, EventPhotoRow>(&format!(
        "SELECT {COLUMNS} FROM event_photos WHERE event_id = $1 AND is_cover
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(state.pool_ref())
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Cover photo not found for event with ID {id}.")))?;

    Ok(Json(EventPhotoDto::from_row(row, state.blobs())))
}

/// Replaces the event cover. The previous cover rows are removed in the same
/// transaction that inserts the new one, so exactly one cover remains.
pub async fn upload_cover(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<Json<EventPhotoDto>> {
    let file = state.uploads().single(multipart, FILE_FIELD).await?;

    if fetch_event(state.pool_ref(), id).await?.is_none() {
        return Err(AppError::not_found(ENTITY, id));
    }

    let blobs = state.blobs();
    let path = blobs
        .upload(file.bytes, &file.file_name, &file.content_type, &cover_folder(id))
        .await?;

    let (row, previous) = match swap_cover(&state, id, &path).await {
        Ok(Some(swapped)) => swapped,
        Ok(None) => {
            discard_blob(blobs, &path).await;
            return Err(AppError::not_found(ENTITY, id));
        }
        Err(err) => {
            discard_blob(blobs, &path).await;
            return Err(err.into());
        }
    };

    let folder = cover_folder(id);
    join_all(
        previous
            .iter()
            .map(|stored| discard_owned_blob(blobs, stored, &folder)),
    )
    .await;
    info!(event_id = %id, replaced = previous.len(), "event cover replaced");
    Ok(Json(EventPhotoDto::from_row(row, blobs)))
}

/// Returns the new cover row and the image references of the covers it
/// replaced, or `None` when the event no longer exists.
async fn swap_cover(
    state: &AppState,
    event_id: Uuid,
    path: &str,
) -> sqlx::Result<Option<(EventPhotoRow, Vec<String>)>> {
    let mut tx = state.pool_ref().begin().await?;
    if !lock_event(&mut tx, event_id).await? {
        return Ok(None);
    }

    let previous: Vec<String> = sqlx::query_scalar(
        "DELETE FROM event_photos WHERE event_id = $1 AND is_cover RETURNING image_url",
    )
    .bind(event_id)
    .fetch_all(&mut *tx)
    .await?;

    let row = sqlx::query_as::<_, EventPhotoRow>(&format!(
        "INSERT INTO event_photos (id, event_id, image_url, is_cover) VALUES ($1, $2, $3, TRUE)
         RETURNING {COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(event_id)
    .bind(path)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some((row, previous)))
}

/// Locks the event row for the rest of the transaction; `false` when it is
/// gone.
async fn lock_event(tx: &mut Transaction<'_, Postgres>, event_id: Uuid) -> sqlx::Result<bool> {
    let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM events WHERE id = $1 FOR UPDATE")
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(locked.is_some())
}

/// Gallery photos, oldest first; the cover is listed separately.
pub async fn list_gallery(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<Vec<EventPhotoDto>>> {
    let rows = sqlx::query_as::<_, EventPhotoRow>(&format!(
        "SELECT {COLUMNS} FROM event_photos WHERE event_id = $1 AND NOT is_cover
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(id)
    .fetch_all(state.pool_ref())
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| EventPhotoDto::from_row(row, state.blobs()))
            .collect(),
    ))
}

/// Adds a batch of gallery photos. The batch succeeds or fails as a whole:
/// any upload or insert failure removes every blob stored for it.
pub async fn upload_gallery(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
    WithRejection(multipart, _): WithRejection<Multipart, AppError>,
) -> AppResult<Json<Vec<EventPhotoDto>>> {
    let files = state.uploads().batch(multipart, FILES_FIELD).await?;

    if fetch_event(state.pool_ref(), id).await?.is_none() {
        return Err(AppError::not_found(ENTITY, id));
    }

    let blobs = state.blobs();
    let folder = gallery_folder(id);
    let mut stored = Vec::with_capacity(files.len());
    for file in files {
        match blobs
            .upload(file.bytes, &file.file_name, &file.content_type, &folder)
            .await
        {
            Ok(path) => stored.push(path),
            Err(err) => {
                warn!(event_id = %id, uploaded = stored.len(), "gallery upload failed, rolling back");
                discard_blobs(blobs, &stored).await;
                return Err(err.into());
            }
        }
    }

    let rows = match insert_gallery(&state, id, &stored).await {
        Ok(Some(rows)) => rows,
        Ok(None) => {
            discard_blobs(blobs, &stored).await;
            return Err(AppError::not_found(ENTITY, id));
        }
        Err(err) => {
            discard_blobs(blobs, &stored).await;
            return Err(err.into());
        }
    };

    info!(event_id = %id, photos = rows.len(), "gallery photos added");
    Ok(Json(
        rows.into_iter()
            .map(|row| EventPhotoDto::from_row(row, blobs))
            .collect(),
    ))
}

async fn insert_gallery(
    state: &AppState,
    event_id: Uuid,
    paths: &[String],
) -> sqlx::Result<Option<Vec<EventPhotoRow>>> {
    let mut tx = state.pool_ref().begin().await?;
    if !lock_event(&mut tx, event_id).await? {
        return Ok(None);
    }

    let mut rows = Vec::with_capacity(paths.len());
    for (path, created_at) in paths.iter().zip(batch_timestamps(Utc::now(), paths.len())) {
        let row = sqlx::query_as::<_, EventPhotoRow>(&format!(
            "INSERT INTO event_photos (id, event_id, image_url, is_cover, created_at, updated_at)
             VALUES ($1, $2, $3, FALSE, $4, $4) RETURNING {COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(path)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;
        rows.push(row);
    }
    tx.commit().await?;
    Ok(Some(rows))
}

/// Strictly increasing creation times for a batch, one microsecond apart,
/// so the gallery lists a batch in upload order.
fn batch_timestamps(base: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    (0..count)
        .map(|index| base + Duration::microseconds(index as i64))
        .collect()
}

pub async fn delete_photo(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath((event_id, photo_id)): ApiPath<(Uuid, Uuid)>,
) -> AppResult<Json<ApiMessage>> {
    let pool = state.pool_ref();
    let photo = sqlx::query_as::<_, EventPhotoRow>(&format!(
        "SELECT {COLUMNS} FROM event_photos WHERE id = $1"
    ))
    .bind(photo_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Photo", photo_id))?;

    check_owner(&photo, event_id)?;

    let result = sqlx::query("DELETE FROM event_photos WHERE id = $1 AND event_id = $2")
        .bind(photo_id)
        .bind(event_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Photo", photo_id));
    }

    discard_owned_blob(state.blobs(), &photo.image_url, &event_folder(event_id)).await;
    Ok(Json(ApiMessage::new("Photo deleted successfully.")))
}

fn check_owner(photo: &EventPhotoRow, event_id: Uuid) -> AppResult<()> {
    if photo.event_id != event_id {
        return Err(AppError::bad_request(
            "Photo does not belong to the specified event.",
        ));
    }
    Ok(())
}
