//! Evidence images on the local filesystem.

use crate::domain::event::{evidence_date_folder, evidence_file_name, EVIDENCE_PREFIX};
use crate::ports::storage::{EvidenceStore, StorageError, StorageHealth, StorageKind, StoredImage};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct LocalEvidenceStore {
    base_folder: PathBuf,
}

impl LocalEvidenceStore {
    /// Create the store, making sure the base folder exists.
    pub async fn new(base_folder: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_folder = base_folder.into();
        tokio::fs::create_dir_all(&base_folder).await?;
        tracing::info!(folder = %base_folder.display(), "Local evidence storage configured");
        Ok(Self { base_folder })
    }

    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    fn resolve(&self, image_path: &str) -> Result<PathBuf, StorageError> {
        if !path_is_valid(image_path) {
            return Err(StorageError::InvalidPath(image_path.to_string()));
        }
        Ok(self.base_folder.join(image_path))
    }
}

/// Only plain relative paths below the base folder are accepted.
fn path_is_valid(image_path: &str) -> bool {
    !image_path.is_empty()
        && Path::new(image_path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

#[async_trait]
impl EvidenceStore for LocalEvidenceStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    fn bucket_url(&self, object_name: &str) -> String {
        format!("/{}", object_name)
    }

    async fn save_image(
        &self,
        data: &[u8],
        image_name: &str,
        plate_prefix: &str,
    ) -> Result<StoredImage, StorageError> {
        let now = Utc::now();
        let date = evidence_date_folder(now);
        let filename = evidence_file_name(now, plate_prefix, image_name);

        let date_folder = self.base_folder.join(&date);
        tokio::fs::create_dir_all(&date_folder).await?;
        tokio::fs::write(date_folder.join(&filename), data).await?;

        let relative_path = format!("{}/{}", date, filename);
        let bucket_url = self.bucket_url(&format!("{}/{}", EVIDENCE_PREFIX, relative_path));
        tracing::info!(path = %relative_path, "Image saved locally");
        Ok(StoredImage {
            relative_path,
            bucket_url,
        })
    }

    async fn image_url(
        &self,
        image_path: &str,
        _expires_in: Duration,
    ) -> Result<Option<String>, StorageError> {
        let path = self.resolve(image_path)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(format!("/{}/{}", EVIDENCE_PREFIX, image_path)))
    }

    async fn delete_image(&self, image_path: &str) -> Result<bool, StorageError> {
        let path = self.resolve(image_path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %image_path, "Image deleted locally");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> StorageHealth {
        let exists = tokio::fs::metadata(&self.base_folder)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        StorageHealth {
            storage_type: StorageKind::Local.as_str().to_string(),
            status: "healthy".to_string(),
            bucket: "local_storage".to_string(),
            base_folder: Some(self.base_folder.display().to_string()),
            folder_exists: Some(exists),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn saves_under_date_folder() {
        let dir = tempdir().unwrap();
        let store = LocalEvidenceStore::new(dir.path().join("evidence")).await.unwrap();

        let stored = store
            .save_image(b"jpeg-bytes", "detection.jpg", "ABC123")
            .await
            .unwrap();

        let (date, file) = stored.relative_path.split_once('/').unwrap();
        assert_eq!(date, evidence_date_folder(Utc::now()));
        assert!(file.starts_with("ABC123_neural_"));
        assert!(file.ends_with("_detection.jpg"));
        assert_eq!(
            stored.bucket_url,
            format!("/evidencias_neural/{}", stored.relative_path)
        );

        let on_disk = std::fs::read(store.base_folder().join(&stored.relative_path)).unwrap();
        assert_eq!(on_disk, b"jpeg-bytes");
    }

    #[tokio::test]
    async fn deletes_once() {
        let dir = tempdir().unwrap();
        let store = LocalEvidenceStore::new(dir.path()).await.unwrap();
        let stored = store.save_image(b"x", "a.jpg", "unknown").await.unwrap();

        assert!(store.delete_image(&stored.relative_path).await.unwrap());
        assert!(!store.delete_image(&stored.relative_path).await.unwrap());
    }

    #[tokio::test]
    async fn refuses_paths_outside_base() {
        let dir = tempdir().unwrap();
        let store = LocalEvidenceStore::new(dir.path()).await.unwrap();

        for path in ["../etc/passwd", "/etc/passwd", "", "a/../../b"] {
            assert!(matches!(
                store.delete_image(path).await,
                Err(StorageError::InvalidPath(_))
            ));
        }
    }

    #[tokio::test]
    async fn serves_url_only_for_existing_images() {
        let dir = tempdir().unwrap();
        let store = LocalEvidenceStore::new(dir.path()).await.unwrap();
        let missing = store
            .image_url("2024-05-01/a.jpg", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(missing, None);

        let stored = store.save_image(b"x", "a.jpg", "ABC123").await.unwrap();
        let url = store
            .image_url(&stored.relative_path, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url, Some(stored.bucket_url));
    }

    #[tokio::test]
    async fn reports_folder_in_health() {
        let dir = tempdir().unwrap();
        let store = LocalEvidenceStore::new(dir.path()).await.unwrap();
        let health = store.health_check().await;
        assert!(health.is_healthy());
        assert_eq!(health.folder_exists, Some(true));
        assert_eq!(health.bucket, "local_storage");
    }
}
