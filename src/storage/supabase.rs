use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header};

use super::{BlobStore, DeleteOutcome, blob_name, is_safe_relative, join_path};

/// Supabase Storage backend, talking to the REST object API.
#[derive(Clone)]
pub struct SupabaseBlobStore {
    http: Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl SupabaseBlobStore {
    pub fn new(base_url: String, service_key: String, bucket: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket,
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    fn public_base(&self) -> String {
        format!(
            "{}/storage/v1/object/public/{}/",
            self.base_url, self.bucket
        )
    }
}

#[async_trait]
impl BlobStore for SupabaseBlobStore {
    async fn upload(
        &self,
        bytes: Bytes,
        original_name: &str,
        content_type: &str,
        folder: &str,
    ) -> Result<String> {
        let path = join_path(folder, &blob_name(original_name));

        let response = self
            .http
            .post(self.object_url(&path))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .context("failed to reach supabase storage")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("supabase upload failed with {status}: {body}");
        }

        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<DeleteOutcome> {
        if !is_safe_relative(path) {
            bail!("refusing blob path outside the bucket: {path}");
        }

        let response = self
            .http
            .delete(self.object_url(path))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .send()
            .await
            .context("failed to reach supabase storage")?;

        let status = response.status();
        if status.is_success() {
            return Ok(DeleteOutcome::Deleted);
        }

        let body = response.text().await.unwrap_or_default();
        if is_not_found(status, &body) {
            return Ok(DeleteOutcome::NotFound);
        }

        bail!("supabase delete failed with {status}: {body}")
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}{}", self.public_base(), path.trim_start_matches('/'))
    }

    fn path_of(&self, stored: &str) -> Option<String> {
        let path = match stored.strip_prefix(self.public_base().as_str()) {
            Some(path) => path,
            None if stored.starts_with("http://") || stored.starts_with("https://") => {
                return None;
            }
            None => stored,
        };
        is_safe_relative(path).then(|| path.to_string())
    }
}

// Storage answers a missing object with 404, or 400 carrying a "not_found" body.
fn is_not_found(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }
    let body = body.to_ascii_lowercase();
    status == StatusCode::BAD_REQUEST && (body.contains("not_found") || body.contains("not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SupabaseBlobStore {
        SupabaseBlobStore::new(
            "https://project.supabase.co/".to_string(),
            "service-key".to_string(),
            "uploads".to_string(),
        )
    }

    #[test]
    fn builds_object_and_public_urls() {
        let store = store();
        assert_eq!(
            store.object_url("events/1/cover/a.png"),
            "https://project.supabase.co/storage/v1/object/uploads/events/1/cover/a.png"
        );
        assert_eq!(
            store.public_url("events/1/cover/a.png"),
            "https://project.supabase.co/storage/v1/object/public/uploads/events/1/cover/a.png"
        );
    }

    #[test]
    fn path_of_accepts_own_urls_only() {
        let store = store();
        let url = store.public_url("committees/3/logo/x.jpg");
        assert_eq!(store.path_of(&url).as_deref(), Some("committees/3/logo/x.jpg"));
        assert_eq!(
            store.path_of("committees/3/logo/x.jpg").as_deref(),
            Some("committees/3/logo/x.jpg")
        );
        assert_eq!(store.path_of("https://other.example/x.jpg"), None);
    }

    #[test]
    fn recognizes_not_found_responses() {
        assert!(is_not_found(StatusCode::NOT_FOUND, ""));
        assert!(is_not_found(
            StatusCode::BAD_REQUEST,
            r#"{"statusCode":"404","error":"not_found"}"#
        ));
        assert!(!is_not_found(StatusCode::UNAUTHORIZED, "not_found"));
    }
}
