use std::future::Future;

use uuid::Uuid;

use crate::{
    storage::{discard_blob, discard_owned_blob},
    web::{AppError, AppResult, AppState, uploads::IncomingFile},
};

/// Multipart field carrying a single image.
pub const FILE_FIELD: &str = "file";
/// Multipart field carrying a gallery batch.
pub const FILES_FIELD: &str = "files";

/// Where an entity keeps one of its images: `<kind>/<id>/<role>`.
pub struct ImageSlot<'a> {
    pub entity: &'a str,
    pub kind: &'a str,
    pub id: Uuid,
    pub role: &'a str,
}

impl ImageSlot<'_> {
    pub fn folder(&self) -> String {
        format!("{}/{}/{}", self.kind, self.id, self.role)
    }
}

/// Uploads an already validated image and swaps it onto the entity.
///
/// `previous` is the image reference read while checking the entity exists.
/// `persist` stores the new path and returns the refreshed row, or `None`
/// when the entity disappeared meanwhile. The new blob is discarded when
/// persisting fails; the previous blob is only removed after the row points
/// at the new one, and only when it lives in this slot's folder.
pub async fn replace_image<T, F, Fut>(
    state: &AppState,
    slot: ImageSlot<'_>,
    file: IncomingFile,
    previous: Option<String>,
    persist: F,
) -> AppResult<T>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = sqlx::Result<Option<T>>>,
{
    let blobs = state.blobs();
    let path = blobs
        .upload(file.bytes, &file.file_name, &file.content_type, &slot.folder())
        .await?;

    let updated = match persist(path.clone()).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            discard_blob(blobs, &path).await;
            return Err(AppError::not_found(slot.entity, slot.id));
        }
        Err(err) => {
            discard_blob(blobs, &path).await;
            return Err(err.into());
        }
    };

    if let Some(previous) = previous.filter(|previous| *previous != path) {
        discard_owned_blob(blobs, &previous, &slot.folder()).await;
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::{storage::testing::MemoryBlobStore, web::testing::test_state};

    fn slot(id: Uuid) -> ImageSlot<'static> {
        ImageSlot {
            entity: "Committee",
            kind: "committees",
            id,
            role: "logo",
        }
    }

    fn png() -> IncomingFile {
        IncomingFile {
            file_name: "logo.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: Bytes::from_static(b"png"),
        }
    }

    #[test]
    fn folder_is_scoped_by_kind_id_and_role() {
        assert_eq!(
            slot(Uuid::nil()).folder(),
            "committees/00000000-0000-0000-0000-000000000000/logo"
        );
    }

    #[tokio::test]
    async fn previous_image_is_removed_after_persisting() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let state = test_state(blobs.clone());
        let id = Uuid::new_v4();
        let previous = format!("committees/{id}/logo/old.png");

        let stored = replace_image(
            &state,
            slot(id),
            png(),
            Some(format!("/uploads/{previous}")),
            |path| async move { Ok::<_, sqlx::Error>(Some(path)) },
        )
        .await
        .expect("replace");

        assert!(stored.starts_with(&format!("committees/{id}/logo/")));
        assert!(stored.ends_with(".png"));
        assert_eq!(blobs.uploads.lock().unwrap().as_slice(), [stored.clone()]);
        assert_eq!(blobs.deletes.lock().unwrap().as_slice(), [previous]);
    }

    #[tokio::test]
    async fn previous_image_of_another_entity_is_kept() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let state = test_state(blobs.clone());
        let event_cover = format!("events/{}/cover/keep.png", Uuid::new_v4());

        replace_image(
            &state,
            slot(Uuid::new_v4()),
            png(),
            Some(event_cover),
            |path| async move { Ok::<_, sqlx::Error>(Some(path)) },
        )
        .await
        .expect("replace");

        assert_eq!(blobs.uploads.lock().unwrap().len(), 1);
        assert!(blobs.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn vanished_entity_discards_new_blob() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let state = test_state(blobs.clone());

        let err = replace_image(
            &state,
            slot(Uuid::new_v4()),
            png(),
            Some("committees/old/logo/old.png".to_string()),
            |_path| async move { Ok::<Option<String>, sqlx::Error>(None) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        let uploaded = blobs.uploads.lock().unwrap().clone();
        assert_eq!(blobs.deletes.lock().unwrap().as_slice(), uploaded.as_slice());
    }

    #[tokio::test]
    async fn failed_persist_keeps_previous_image() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let state = test_state(blobs.clone());

        let err = replace_image(
            &state,
            slot(Uuid::new_v4()),
            png(),
            Some("committees/old/logo/old.png".to_string()),
            |_path| async move { Err::<Option<String>, _>(sqlx::Error::PoolTimedOut) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Database(_)));
        let deletes = blobs.deletes.lock().unwrap().clone();
        assert_eq!(deletes.len(), 1);
        assert_ne!(deletes[0], "committees/old/logo/old.png");
    }
}
