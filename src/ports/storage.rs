use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid image path: {0}")]
    InvalidPath(String),
    #[error("Object storage request failed: {0}")]
    Remote(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Local,
    OracleCloud,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::OracleCloud => "oracle_cloud",
        }
    }
}

/// Location of a stored evidence image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredImage {
    /// `YYYY-MM-DD/<file name>`, the path accepted by `image_url` and `delete_image`.
    pub relative_path: String,
    /// Full URL of the object in the bucket (or the public local path).
    pub bucket_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageHealth {
    pub storage_type: String,
    pub status: String,
    pub bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StorageHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Full URL of an object given its name inside the bucket.
    fn bucket_url(&self, object_name: &str) -> String;

    /// Store an image under today's folder, prefixed with the plate.
    async fn save_image(
        &self,
        data: &[u8],
        image_name: &str,
        plate_prefix: &str,
    ) -> Result<StoredImage, StorageError>;

    /// URL granting temporary read access. `None` when the image cannot be served.
    async fn image_url(
        &self,
        image_path: &str,
        expires_in: Duration,
    ) -> Result<Option<String>, StorageError>;

    /// Returns false when there was nothing to delete.
    async fn delete_image(&self, image_path: &str) -> Result<bool, StorageError>;

    async fn health_check(&self) -> StorageHealth;
}
