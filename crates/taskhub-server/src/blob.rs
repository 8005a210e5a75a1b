//! Storage for uploaded files (message attachments, group images).

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Maximum file size: 25 MB
pub const MAX_FILE_SIZE: usize = 25 * 1024 * 1024;

/// Allowed file extensions
const ALLOWED_EXTENSIONS: &[&str] = &[
    // Images
    "jpg", "jpeg", "png", "gif", "webp", "svg", "bmp",
    // Documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "txt", "rtf", "csv", "md",
    // Archives
    "zip", "tar", "gz", "7z",
    // Audio / video
    "mp3", "wav", "ogg", "m4a", "mp4", "webm", "mov",
];

/// A file received in a request, not yet stored
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

pub type DynBlobStore = Arc<dyn BlobStore>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the file and returns its public URL, or `None` if it could not be stored.
    async fn upload(&self, file: PendingUpload) -> Option<String>;
}

/// Keeps files on local disk; they are served back under `/files`.
#[derive(Clone)]
pub struct LocalBlobStore {
    upload_dir: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    pub fn new(upload_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn upload_dir(&self) -> &PathBuf {
        &self.upload_dir
    }

    pub fn validate_file(filename: &str, size: usize) -> Result<String, String> {
        if size == 0 {
            return Err("File is empty".to_string());
        }
        if size > MAX_FILE_SIZE {
            return Err(format!(
                "File too large. Maximum size is {} MB",
                MAX_FILE_SIZE / 1024 / 1024
            ));
        }

        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(format!("File type '{}' is not allowed", extension));
        }

        Ok(extension)
    }

    async fn store(&self, file: &PendingUpload) -> Result<String, String> {
        let extension = Self::validate_file(&file.filename, file.data.len())?;

        fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|e| format!("Failed to create upload directory: {}", e))?;

        // Store with UUID-based filename to avoid conflicts
        let storage_name = format!("{}.{}", Uuid::new_v4(), extension);
        let path = self.upload_dir.join(&storage_name);

        let mut out = fs::File::create(&path)
            .await
            .map_err(|e| format!("Failed to create file: {}", e))?;
        out.write_all(&file.data)
            .await
            .map_err(|e| format!("Failed to write file: {}", e))?;

        Ok(format!("{}/files/{}", self.base_url, storage_name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, file: PendingUpload) -> Option<String> {
        match self.store(&file).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("Upload of '{}' failed: {}", file.filename, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, data: &[u8]) -> PendingUpload {
        PendingUpload {
            filename: name.to_string(),
            content_type: None,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_validate_file() {
        assert_eq!(LocalBlobStore::validate_file("photo.PNG", 10), Ok("png".to_string()));
        assert!(LocalBlobStore::validate_file("run.exe", 10).is_err());
        assert!(LocalBlobStore::validate_file("noext", 10).is_err());
        assert!(LocalBlobStore::validate_file("big.png", MAX_FILE_SIZE + 1).is_err());
        assert!(LocalBlobStore::validate_file("empty.png", 0).is_err());
    }

    #[tokio::test]
    async fn test_upload_writes_file_and_returns_url() {
        let dir = std::env::temp_dir().join(format!("taskhub-blob-{}", Uuid::new_v4()));
        let store = LocalBlobStore::new(&dir, "http://localhost:8008/");

        let url = store.upload(upload("notes.txt", b"hello")).await.unwrap();
        assert!(url.starts_with("http://localhost:8008/files/"));
        assert!(url.ends_with(".txt"));

        let name = url.rsplit('/').next().unwrap();
        assert_eq!(fs::read(dir.join(name)).await.unwrap(), b"hello");

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_rejected_upload_yields_none() {
        let dir = std::env::temp_dir().join(format!("taskhub-blob-{}", Uuid::new_v4()));
        let store = LocalBlobStore::new(&dir, "");
        assert!(store.upload(upload("virus.exe", b"MZ")).await.is_none());
    }
}
