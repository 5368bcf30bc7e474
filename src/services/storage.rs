use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::core::config::Settings;

#[derive(Debug, Error)]
pub(crate) enum StorageError {
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),
    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local-filesystem storage for uploaded exam pages. Files land under
/// `<upload_dir>/<submission_id>/`, named by page index and a content
/// digest prefix so re-uploads of identical bytes are recognizable.
#[derive(Debug, Clone)]
pub(crate) struct StorageService {
    upload_dir: PathBuf,
    allowed_extensions: Vec<String>,
    max_upload_bytes: u64,
}

impl StorageService {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            upload_dir: PathBuf::from(&settings.storage().upload_dir),
            allowed_extensions: settings.storage().allowed_image_extensions.clone(),
            max_upload_bytes: settings.storage().max_upload_size_mb * 1024 * 1024,
        }
    }

    pub(crate) async fn ensure_layout(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }

    pub(crate) fn validate_extension(&self, filename: &str) -> Result<String, StorageError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if extension.is_empty() || !self.allowed_extensions.contains(&extension) {
            return Err(StorageError::UnsupportedExtension(extension));
        }
        Ok(extension)
    }

    pub(crate) async fn save_submission_image(
        &self,
        submission_id: &str,
        page_index: usize,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let extension = self.validate_extension(filename)?;

        let size = bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(StorageError::TooLarge { size, limit: self.max_upload_bytes });
        }

        let digest = hex::encode(Sha256::digest(bytes));
        let directory = self.upload_dir.join(submission_id);
        tokio::fs::create_dir_all(&directory).await?;

        let target = directory.join(format!("{page_index:02}_{}.{extension}", &digest[..12]));
        tokio::fs::write(&target, bytes).await?;
        debug!(
            submission_id,
            page_index,
            size,
            path = %target.display(),
            "Stored submission image"
        );

        Ok(target.to_string_lossy().into_owned())
    }

    /// Best effort: a missing file is not an error during cleanup.
    pub(crate) async fn delete_files(&self, paths: &[String]) {
        for path in paths {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(dir: &Path) -> StorageService {
        StorageService {
            upload_dir: dir.to_path_buf(),
            allowed_extensions: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
            max_upload_bytes: 1024,
        }
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("edugrade-storage-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn saves_and_rereads_an_upload() {
        let dir = scratch_dir();
        let storage = service(&dir);
        storage.ensure_layout().await.expect("layout");

        let path = storage
            .save_submission_image("sub-1", 0, "page.PNG", b"fake image bytes")
            .await
            .expect("save");
        let read_back = tokio::fs::read(&path).await.expect("read back");
        assert_eq!(read_back, b"fake image bytes");
        assert!(path.contains("sub-1"));
        assert!(path.ends_with(".png"));

        storage.delete_files(&[path]).await;
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn rejects_unsupported_extensions() {
        let dir = scratch_dir();
        let storage = service(&dir);

        let err = storage
            .save_submission_image("sub-1", 0, "notes.pdf", b"%PDF-")
            .await
            .expect_err("pdf rejected");
        assert!(matches!(err, StorageError::UnsupportedExtension(ref ext) if ext == "pdf"));

        let err = storage.validate_extension("no_extension").expect_err("rejected");
        assert!(matches!(err, StorageError::UnsupportedExtension(_)));
    }

    #[tokio::test]
    async fn rejects_oversized_uploads() {
        let dir = scratch_dir();
        let storage = service(&dir);

        let oversized = vec![0u8; 2048];
        let err = storage
            .save_submission_image("sub-1", 0, "page.jpg", &oversized)
            .await
            .expect_err("too large");
        assert!(matches!(err, StorageError::TooLarge { size: 2048, limit: 1024 }));
    }
}
