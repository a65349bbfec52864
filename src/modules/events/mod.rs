mod photos;

use std::collections::HashMap;

use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use self::photos::{EventPhotoDto, EventPhotoRow};
use super::{
    committees::{CommitteeDto, CommitteeRow},
    optional_text, require_text,
};
use crate::{
    storage::{BlobStore, discard_owned_blob},
    web::{ApiJson, ApiMessage, ApiPath, AppError, AppResult, AppState, AuthAdmin},
};

const ENTITY: &str = "Event";
const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 5000;
const LOCATION_MAX: usize = 200;
const UPCOMING_DAYS: i64 = 7;
const COLUMNS: &str = "id, title, description, start_date, end_date, location, quota, \
                       is_important, created_at, updated_at";
const UNKNOWN_COMMITTEES: &str = "One or more committees do not exist.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route("/events/important", get(important_events))
        .route("/events/upcoming", get(upcoming_events))
        .route("/events/committee/:committee_id", get(list_committee_events))
        .route(
            "/events/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
        .merge(photos::router())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    pub quota: Option<i32>,
    pub is_important: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A committee joined through `event_committees`.
#[derive(Debug, sqlx::FromRow)]
struct EventCommitteeRow {
    event_id: Uuid,
    #[sqlx(flatten)]
    committee: CommitteeRow,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub cover_image_url: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    pub quota: Option<i32>,
    pub is_important: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub committees: Vec<CommitteeDto>,
    /// Gallery photos only, matching `GET /events/:id/photos`; the cover
    /// is exposed through `cover_image_url`.
    pub photos: Vec<EventPhotoDto>,
}

impl EventDto {
    fn assemble(row: EventRow, committees: Vec<CommitteeDto>, photos: Vec<EventPhotoDto>) -> Self {
        let (covers, photos): (Vec<_>, Vec<_>) =
            photos.into_iter().partition(|photo| photo.is_cover);
        let cover_image_url = covers.into_iter().last().map(|photo| photo.image_url);

        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            cover_image_url,
            start_date: row.start_date,
            end_date: row.end_date,
            location: row.location,
            quota: row.quota,
            is_important: row.is_important,
            created_at: row.created_at,
            updated_at: row.updated_at,
            committees,
            photos,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    pub quota: Option<i32>,
    #[serde(default)]
    pub is_important: bool,
    pub committee_ids: Option<Vec<Uuid>>,
}

struct EventInput {
    title: String,
    description: Option<String>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    location: Option<String>,
    quota: Option<i32>,
    is_important: bool,
    /// `None` leaves existing associations untouched on update.
    committee_ids: Option<Vec<Uuid>>,
}

impl EventPayload {
    fn validate(&self) -> AppResult<EventInput> {
        let title = require_text(&self.title, "Title", TITLE_MAX)?;
        if self.end_date < self.start_date {
            return Err(AppError::bad_request(
                "End date must not be earlier than start date.",
            ));
        }
        if self.quota.is_some_and(|quota| quota < 0) {
            return Err(AppError::bad_request("Quota must not be negative."));
        }

        Ok(EventInput {
            title,
            description: optional_text(self.description.as_deref(), "Description", DESCRIPTION_MAX)?,
            start_date: self.start_date,
            end_date: self.end_date,
            location: optional_text(self.location.as_deref(), "Location", LOCATION_MAX)?,
            quota: self.quota,
            is_important: self.is_important,
            committee_ids: self.committee_ids.as_deref().map(dedup_ids),
        })
    }
}

fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }
    unique
}

/// Upload folder holding every image of an event.
pub(crate) fn event_folder(id: Uuid) -> String {
    format!("events/{id}")
}

/// Events starting within the next week, bounds inclusive.
pub fn upcoming_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now, now + Duration::days(UPCOMING_DAYS))
}

pub async fn list_events(State(state): State<AppState>) -> AppResult<Json<Vec<EventDto>>> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {COLUMNS} FROM events ORDER BY created_at DESC"
    ))
    .fetch_all(state.pool_ref())
    .await?;
    Ok(Json(hydrate(state.pool_ref(), state.blobs(), rows).await?))
}

pub async fn important_events(State(state): State<AppState>) -> AppResult<Json<Vec<EventDto>>> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {COLUMNS} FROM events WHERE is_important ORDER BY created_at DESC"
    ))
    .fetch_all(state.pool_ref())
    .await?;
    Ok(Json(hydrate(state.pool_ref(), state.blobs(), rows).await?))
}

pub async fn upcoming_events(State(state): State<AppState>) -> AppResult<Json<Vec<EventDto>>> {
    let (from, until) = upcoming_window(Utc::now());
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {COLUMNS} FROM events WHERE start_date >= $1 AND start_date <= $2
         ORDER BY start_date ASC"
    ))
    .bind(from)
    .bind(until)
    .fetch_all(state.pool_ref())
    .await?;
    Ok(Json(hydrate(state.pool_ref(), state.blobs(), rows).await?))
}

pub async fn list_committee_events(
    State(state): State<AppState>,
    ApiPath(committee_id): ApiPath<Uuid>,
) -> AppResult<Json<Vec<EventDto>>> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {COLUMNS} FROM events
         WHERE id IN (SELECT event_id FROM event_committees WHERE committee_id = $1)
         ORDER BY created_at DESC"
    ))
    .bind(committee_id)
    .fetch_all(state.pool_ref())
    .await?;
    Ok(Json(hydrate(state.pool_ref(), state.blobs(), rows).await?))
}

pub async fn get_event(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<EventDto>> {
    Ok(Json(load_event(&state, id).await?))
}

pub async fn create_event(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiJson(payload): ApiJson<EventPayload>,
) -> AppResult<Json<EventDto>> {
    let input = payload.validate()?;
    let id = Uuid::new_v4();

    let mut tx = state.pool_ref().begin().await?;
    sqlx::query(
        "INSERT INTO events
            (id, title, description, start_date, end_date, location, quota, is_important)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(&input.location)
    .bind(input.quota)
    .bind(input.is_important)
    .execute(&mut *tx)
    .await?;

    if let Some(committee_ids) = &input.committee_ids {
        link_committees(&mut tx, id, committee_ids).await?;
    }
    tx.commit().await?;

    info!(event_id = %id, "event created");
    Ok(Json(load_event(&state, id).await?))
}

pub async fn update_event(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<EventPayload>,
) -> AppResult<Json<EventDto>> {
    let input = payload.validate()?;

    let mut tx = state.pool_ref().begin().await?;
    let result = sqlx::query(
        "UPDATE events
         SET title = $2, description = $3, start_date = $4, end_date = $5, location = $6,
             quota = $7, is_important = $8, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(&input.location)
    .bind(input.quota)
    .bind(input.is_important)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(ENTITY, id));
    }

    if let Some(committee_ids) = &input.committee_ids {
        sqlx::query("DELETE FROM event_committees WHERE event_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        link_committees(&mut tx, id, committee_ids).await?;
    }
    tx.commit().await?;

    Ok(Json(load_event(&state, id).await?))
}

/// Deletes the event with its photos and committee links, then the photo
/// blobs.
pub async fn delete_event(
    State(state): State<AppState>,
    _admin: AuthAdmin,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<ApiMessage>> {
    let pool = state.pool_ref();
    let images: Vec<String> =
        sqlx::query_scalar("SELECT image_url FROM event_photos WHERE event_id = $1")
            .bind(id)
            .fetch_all(pool)
            .await?;

    let result = sqlx::query("DELETE FROM events WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(ENTITY, id));
    }

    let folder = event_folder(id);
    join_all(
        images
            .iter()
            .map(|image| discard_owned_blob(state.blobs(), image, &folder)),
    )
    .await;
    info!(event_id = %id, photos = images.len(), "event deleted");
    Ok(Json(ApiMessage::new("Event deleted successfully.")))
}

async fn link_committees(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
    committee_ids: &[Uuid],
) -> AppResult<()> {
    if committee_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO event_committees (event_id, committee_id)
         SELECT $1, UNNEST($2::uuid[])",
    )
    .bind(event_id)
    .bind(committee_ids)
    .execute(&mut **tx)
    .await
    .map_err(|err| AppError::from_write(err, UNKNOWN_COMMITTEES))?;
    Ok(())
}

async fn load_event(state: &AppState, id: Uuid) -> AppResult<EventDto> {
    let row = fetch_event(state.pool_ref(), id)
        .await?
        .ok_or_else(|| AppError::not_found(ENTITY, id))?;
    hydrate(state.pool_ref(), state.blobs(), vec![row])
        .await?
        .pop()
        .ok_or_else(|| AppError::not_found(ENTITY, id))
}

pub(crate) async fn fetch_event(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<EventRow>> {
    sqlx::query_as::<_, EventRow>(&format!("SELECT {COLUMNS} FROM events WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Attaches committees and photos to `rows` with one query each, keeping
/// the order of `rows`.
async fn hydrate(
    pool: &PgPool,
    blobs: &dyn BlobStore,
    rows: Vec<EventRow>,
) -> sqlx::Result<Vec<EventDto>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

    let committee_rows = sqlx::query_as::<_, EventCommitteeRow>(
        "SELECT ec.event_id, c.id, c.name, c.description, c.logo_url, c.created_at, c.updated_at
         FROM event_committees ec JOIN committees c ON c.id = ec.committee_id
         WHERE ec.event_id = ANY($1)
         ORDER BY c.name",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let photo_rows = sqlx::query_as::<_, EventPhotoRow>(&format!(
        "SELECT {} FROM event_photos WHERE event_id = ANY($1) ORDER BY created_at ASC, id ASC",
        photos::COLUMNS
    ))
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    Ok(group_children(rows, committee_rows, photo_rows, blobs))
}

fn group_children(
    rows: Vec<EventRow>,
    committee_rows: Vec<EventCommitteeRow>,
    photo_rows: Vec<EventPhotoRow>,
    blobs: &dyn BlobStore,
) -> Vec<EventDto> {
    let mut committees: HashMap<Uuid, Vec<CommitteeDto>> = HashMap::new();
    for row in committee_rows {
        committees
            .entry(row.event_id)
            .or_default()
            .push(CommitteeDto::from_row(row.committee, blobs));
    }

    let mut photos: HashMap<Uuid, Vec<EventPhotoDto>> = HashMap::new();
    for row in photo_rows {
        photos
            .entry(row.event_id)
            .or_default()
            .push(EventPhotoDto::from_row(row, blobs));
    }

    rows.into_iter()
        .map(|row| {
            let id = row.id;
            EventDto::assemble(
                row,
                committees.remove(&id).unwrap_or_default(),
                photos.remove(&id).unwrap_or_default(),
            )
        })
        .collect()
}
