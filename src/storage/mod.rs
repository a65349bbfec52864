mod local;
mod supabase;

pub use local::LocalBlobStore;
pub use supabase::SupabaseBlobStore;

use std::{path::Path, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StorageSettings;

/// Outcome of a blob deletion. A missing object is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Storage for uploaded images, addressed by a relative path such as
/// `committees/<id>/logo/<uuid>.png`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `folder` with a collision-resistant name and
    /// returns the relative path.
    async fn upload(
        &self,
        bytes: Bytes,
        original_name: &str,
        content_type: &str,
        folder: &str,
    ) -> Result<String>;

    async fn delete(&self, path: &str) -> Result<DeleteOutcome>;

    fn public_url(&self, path: &str) -> String;

    /// Recovers the relative path from a stored value or a URL produced by
    /// [`BlobStore::public_url`]. Values owned by someone else yield `None`.
    fn path_of(&self, stored: &str) -> Option<String>;
}

pub type SharedBlobStore = Arc<dyn BlobStore>;

pub async fn from_settings(settings: &StorageSettings) -> Result<SharedBlobStore> {
    match settings {
        StorageSettings::Local {
            root,
            public_prefix,
        } => {
            let store = LocalBlobStore::new(root.clone(), public_prefix.clone()).await?;
            info!(root = %root.display(), "using local blob store");
            Ok(Arc::new(store))
        }
        StorageSettings::Supabase {
            url,
            service_key,
            bucket,
        } => {
            info!(%url, %bucket, "using supabase blob store");
            Ok(Arc::new(SupabaseBlobStore::new(
                url.clone(),
                service_key.clone(),
                bucket.clone(),
            )))
        }
    }
}

/// Renders a stored image reference as a URL clients can fetch.
pub fn resolve_url(store: &dyn BlobStore, stored: Option<&str>) -> Option<String> {
    stored.map(|value| {
        if is_absolute_url(value) || value.starts_with('/') {
            value.to_string()
        } else {
            store.public_url(value)
        }
    })
}

/// Best-effort removal of a previously stored image. Failures are logged
/// and swallowed since the blob may already be gone.
pub async fn discard_blob(store: &dyn BlobStore, stored: &str) {
    let Some(path) = store.path_of(stored) else {
        return;
    };

    match store.delete(&path).await {
        Ok(DeleteOutcome::Deleted) => info!(%path, "deleted blob"),
        Ok(DeleteOutcome::NotFound) => info!(%path, "blob already absent"),
        Err(err) => warn!(?err, %path, "failed to delete blob"),
    }
}

/// Like [`discard_blob`], but only for blobs stored under `folder`. Image
/// fields are writable by admins, so a row may reference a blob owned by
/// another entity; such references are left alone.
pub async fn discard_owned_blob(store: &dyn BlobStore, stored: &str, folder: &str) {
    match store.path_of(stored) {
        Some(path) if is_within(&path, folder) => discard_blob(store, &path).await,
        Some(path) => info!(%path, %folder, "keeping blob outside the owner folder"),
        None => {}
    }
}

pub async fn discard_blobs<I, S>(store: &dyn BlobStore, stored: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let stored: Vec<S> = stored.into_iter().collect();
    join_all(
        stored
            .iter()
            .map(|value| discard_blob(store, value.as_ref())),
    )
    .await;
}

/// `<uuid>.<ext>` with the original extension lowercased, or a bare uuid
/// when the original name has no usable extension.
pub(crate) fn blob_name(original_name: &str) -> String {
    let sanitized = sanitize_filename::sanitize(original_name);
    let extension = Path::new(&sanitized)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

pub(crate) fn join_path(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}

pub(crate) fn is_within(path: &str, folder: &str) -> bool {
    let folder = folder.trim_matches('/');
    !folder.is_empty()
        && path
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Rejects empty, absolute and parent-escaping paths.
pub(crate) fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

fn is_absolute_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}
