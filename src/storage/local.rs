use std::{io::ErrorKind, path::PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use super::{BlobStore, DeleteOutcome, blob_name, is_safe_relative, join_path};

/// Stores blobs below a directory that is also served as static files under
/// `public_prefix`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    public_prefix: String,
}

impl LocalBlobStore {
    pub async fn new(root: PathBuf, public_prefix: String) -> Result<Self> {
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to ensure upload root at {}", root.display()))?;

        Ok(Self {
            root,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if !is_safe_relative(path) {
            bail!("refusing blob path outside the upload root: {path}");
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(
        &self,
        bytes: Bytes,
        original_name: &str,
        _content_type: &str,
        folder: &str,
    ) -> Result<String> {
        let path = join_path(folder, &blob_name(original_name));
        let target = self.resolve(&path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create folder {}", parent.display()))?;
        }

        let mut file = tokio::fs::File::create(&target)
            .await
            .with_context(|| format!("failed to create {}", target.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        file.flush()
            .await
            .with_context(|| format!("failed to flush {}", target.display()))?;

        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<DeleteOutcome> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::NotFound),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete {}", target.display()))
            }
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_prefix, path.trim_start_matches('/'))
    }

    fn path_of(&self, stored: &str) -> Option<String> {
        let prefixed = format!("{}/", self.public_prefix);
        let path = stored
            .strip_prefix(prefixed.as_str())
            .or_else(|| stored.strip_prefix(&prefixed[1..]))
            .unwrap_or(stored);
        is_safe_relative(path).then(|| path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use tempfile::tempdir;

    async fn store(dir: &Path) -> LocalBlobStore {
        LocalBlobStore::new(dir.join("uploads"), "/uploads".to_string())
            .await
            .expect("store")
    }

    #[tokio::test]
    async fn upload_writes_file_under_folder() {
        let dir = tempdir().expect("temp dir");
        let store = store(dir.path()).await;

        let path = store
            .upload(
                Bytes::from_static(b"png-bytes"),
                "logo.PNG",
                "image/png",
                "committees/42/logo",
            )
            .await
            .expect("upload");

        assert!(path.starts_with("committees/42/logo/"));
        assert!(path.ends_with(".png"));
        let written = tokio::fs::read(dir.path().join("uploads").join(&path))
            .await
            .expect("read back");
        assert_eq!(written, b"png-bytes");
    }

    #[tokio::test]
    async fn delete_reports_missing_objects() {
        let dir = tempdir().expect("temp dir");
        let store = store(dir.path()).await;
        let path = store
            .upload(Bytes::from_static(b"x"), "a.jpg", "image/jpeg", "events/1/cover")
            .await
            .expect("upload");

        assert_eq!(store.delete(&path).await.expect("delete"), DeleteOutcome::Deleted);
        assert_eq!(
            store.delete(&path).await.expect("delete again"),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn delete_refuses_escaping_paths() {
        let dir = tempdir().expect("temp dir");
        let store = store(dir.path()).await;
        assert!(store.delete("../secret.txt").await.is_err());
    }

    #[tokio::test]
    async fn public_url_round_trips_through_path_of() {
        let dir = tempdir().expect("temp dir");
        let store = store(dir.path()).await;

        let url = store.public_url("blogposts/7/cover/a.webp");
        assert_eq!(url, "/uploads/blogposts/7/cover/a.webp");
        assert_eq!(
            store.path_of(&url).as_deref(),
            Some("blogposts/7/cover/a.webp")
        );
        assert_eq!(
            store.path_of("uploads/blogposts/7/cover/a.webp").as_deref(),
            Some("blogposts/7/cover/a.webp")
        );
        assert_eq!(store.path_of("https://elsewhere.org/a.png"), None);
    }
}
