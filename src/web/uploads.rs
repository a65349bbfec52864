use std::path::Path;

use axum::extract::Multipart;
use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::config::UploadSettings;

/// Reason an uploaded file was refused. Every variant is recoverable by the
/// caller correcting the input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("File is empty.")]
    Empty,
    #[error("File size exceeds the maximum allowed size of {limit} bytes.")]
    TooLarge { limit: u64 },
    #[error("File extension '{extension}' is not allowed. Allowed extensions: {allowed}")]
    ExtensionNotAllowed { extension: String, allowed: String },
    #[error("At least one file is required in field `{field}`.")]
    Missing { field: String },
    #[error("Too many files in field `{field}` (at most {max}).")]
    TooMany { field: String, max: usize },
    #[error("Failed to read upload form: {0}")]
    Malformed(String),
}

/// A file taken from a multipart form, fully buffered.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl IncomingFile {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercased extension with a leading dot, empty when absent.
    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

/// Size and type rules applied to every image upload.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub max_batch: usize,
}

impl From<&UploadSettings> for UploadPolicy {
    fn from(settings: &UploadSettings) -> Self {
        Self {
            max_file_size: settings.max_file_size,
            allowed_extensions: settings.allowed_extensions.clone(),
            max_batch: settings.max_batch,
        }
    }
}

impl UploadPolicy {
    pub fn validate(&self, file: &IncomingFile) -> Result<(), UploadError> {
        if file.bytes.is_empty() {
            return Err(UploadError::Empty);
        }

        if file.len() > self.max_file_size {
            return Err(UploadError::TooLarge {
                limit: self.max_file_size,
            });
        }

        let extension = file.extension();
        if !self.allowed_extensions.iter().any(|ext| *ext == extension) {
            return Err(UploadError::ExtensionNotAllowed {
                extension,
                allowed: self.allowed_extensions.join(", "),
            });
        }

        Ok(())
    }

    pub fn validate_all(&self, files: &[IncomingFile]) -> Result<(), UploadError> {
        files.iter().try_for_each(|file| self.validate(file))
    }

    /// Reads exactly one file from `field` and validates it.
    pub async fn single(
        &self,
        multipart: Multipart,
        field: &str,
    ) -> Result<IncomingFile, UploadError> {
        let mut files = self.read_files(multipart, field, 1).await?;
        let file = files.pop().ok_or_else(|| UploadError::Missing {
            field: field.to_string(),
        })?;
        self.validate(&file)?;
        Ok(file)
    }

    /// Reads every file in `field` (at most `max_batch`) and validates them
    /// all before returning.
    pub async fn batch(
        &self,
        multipart: Multipart,
        field: &str,
    ) -> Result<Vec<IncomingFile>, UploadError> {
        let files = self.read_files(multipart, field, self.max_batch).await?;
        if files.is_empty() {
            return Err(UploadError::Missing {
                field: field.to_string(),
            });
        }
        self.validate_all(&files)?;
        Ok(files)
    }

    /// Collects file parts named `field`, ignoring other fields. Reading stops
    /// as soon as a part grows past the size limit.
    async fn read_files(
        &self,
        mut multipart: Multipart,
        field_name: &str,
        max_files: usize,
    ) -> Result<Vec<IncomingFile>, UploadError> {
        let mut files = Vec::new();

        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|err| UploadError::Malformed(err.body_text()))?
        {
            if field.name() != Some(field_name) || field.file_name().is_none() {
                continue;
            }

            if files.len() >= max_files {
                return Err(UploadError::TooMany {
                    field: field_name.to_string(),
                    max: max_files,
                });
            }

            let file_name = field.file_name().unwrap_or("upload.bin").to_string();
            let content_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| guess_content_type(&file_name).to_string());

            let mut buffer = BytesMut::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|err| UploadError::Malformed(err.body_text()))?
            {
                if (buffer.len() + chunk.len()) as u64 > self.max_file_size {
                    return Err(UploadError::TooLarge {
                        limit: self.max_file_size,
                    });
                }
                buffer.extend_from_slice(&chunk);
            }

            files.push(IncomingFile {
                file_name,
                content_type,
                bytes: buffer.freeze(),
            });
        }

        Ok(files)
    }
}

fn guess_content_type(file_name: &str) -> mime::Mime {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => mime::IMAGE_JPEG,
        Some("png") => mime::IMAGE_PNG,
        Some("gif") => mime::IMAGE_GIF,
        Some("webp") => "image/webp"
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM),
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> UploadPolicy {
        UploadPolicy {
            max_file_size: 1024,
            allowed_extensions: vec![".jpg".into(), ".jpeg".into(), ".png".into(), ".webp".into()],
            max_batch: 3,
        }
    }

    fn file(name: &str, size: usize) -> IncomingFile {
        IncomingFile {
            file_name: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: Bytes::from(vec![7u8; size]),
        }
    }

    #[test]
    fn accepts_allowed_image() {
        assert_eq!(policy().validate(&file("logo.png", 512)), Ok(()));
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert_eq!(policy().validate(&file("PHOTO.JPEG", 10)), Ok(()));
    }

    #[test]
    fn rejects_empty_payload() {
        assert_eq!(policy().validate(&file("logo.png", 0)), Err(UploadError::Empty));
    }

    #[test]
    fn rejects_oversized_payload() {
        assert_eq!(
            policy().validate(&file("logo.png", 1025)),
            Err(UploadError::TooLarge { limit: 1024 })
        );
        assert_eq!(policy().validate(&file("logo.png", 1024)), Ok(()));
    }

    #[test]
    fn rejects_disallowed_extension_with_reason() {
        let err = policy().validate(&file("payload.exe", 10)).unwrap_err();
        assert!(matches!(err, UploadError::ExtensionNotAllowed { ref extension, .. } if extension == ".exe"));
        assert!(err.to_string().contains(".exe"));
        assert!(err.to_string().contains(".png"));
    }

    #[test]
    fn rejects_missing_extension() {
        assert!(matches!(
            policy().validate(&file("README", 10)),
            Err(UploadError::ExtensionNotAllowed { .. })
        ));
    }

    #[test]
    fn batch_validation_fails_on_any_member() {
        let files = vec![file("a.png", 10), file("b.gif", 10), file("c.png", 10)];
        assert!(policy().validate_all(&files).is_err());
        assert!(policy().validate_all(&files[..1]).is_ok());
    }

    #[test]
    fn content_type_guess_covers_images() {
        assert_eq!(guess_content_type("a.JPG"), mime::IMAGE_JPEG);
        assert_eq!(guess_content_type("a.webp").essence_str(), "image/webp");
        assert_eq!(guess_content_type("a"), mime::APPLICATION_OCTET_STREAM);
    }
}
