use crate::config::OracleConfig;
use crate::domain::event::{evidence_date_folder, evidence_file_name, EVIDENCE_PREFIX};
use crate::ports::storage::{EvidenceStore, StorageError, StorageHealth, StorageKind, StoredImage};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::Utc;
use std::time::Duration;

/// Oracle Cloud Object Storage through its S3-compatible API.
#[derive(Clone)]
pub struct OciObjectStore {
    client: Client,
    namespace: String,
    bucket: String,
    region: String,
    auth_type: String,
    worker_id: String,
}

fn remote<E: std::error::Error>(err: E) -> StorageError {
    StorageError::Remote(DisplayErrorContext(err).to_string())
}

impl OciObjectStore {
    pub fn new(client: Client, config: &OracleConfig, worker_id: &str) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            auth_type: config.auth_type.clone(),
            worker_id: worker_id.to_string(),
        }
    }

    /// Build a client for the namespace's compatibility endpoint. Customer
    /// secret keys are used when configured, the default AWS credential
    /// chain otherwise.
    pub async fn connect(config: &OracleConfig, worker_id: &str) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.s3_compat_endpoint());
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "oci-customer-secret-key",
            );
            loader = loader.credentials_provider(credentials);
        }
        let shared = loader.load().await;

        // The compatibility API only supports path-style addressing.
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        tracing::info!(
            namespace = %config.namespace,
            bucket = %config.bucket,
            region = %config.region,
            auth_type = %config.auth_type,
            "Oracle Cloud Object Storage configured"
        );
        Self::new(Client::from_conf(s3_config), config, worker_id)
    }

    fn object_name(image_path: &str) -> String {
        format!("{}/{}", EVIDENCE_PREFIX, image_path)
    }
}

#[async_trait]
impl EvidenceStore for OciObjectStore {
    fn kind(&self) -> StorageKind {
        StorageKind::OracleCloud
    }

    fn bucket_url(&self, object_name: &str) -> String {
        format!(
            "https://{ns}.objectstorage.{region}.oci.customer-oci.com/n/{ns}/b/{bucket}/o/{object}",
            ns = self.namespace,
            region = self.region,
            bucket = self.bucket,
            object = object_name
        )
    }

    async fn save_image(
        &self,
        data: &[u8],
        image_name: &str,
        plate_prefix: &str,
    ) -> Result<StoredImage, StorageError> {
        let now = Utc::now();
        let relative_path = format!(
            "{}/{}",
            evidence_date_folder(now),
            evidence_file_name(now, plate_prefix, image_name)
        );
        let object_name = Self::object_name(&relative_path);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_name)
            .content_type("image/jpeg")
            .metadata("upload-time", now.to_rfc3339())
            .metadata("worker-id", &self.worker_id)
            .metadata("source", "neural-camera")
            .metadata("camera-type", "neural")
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(object = %object_name, error = %DisplayErrorContext(&e), "Upload failed");
                remote(e)
            })?;

        tracing::info!(object = %object_name, "Image uploaded to Oracle Cloud");
        Ok(StoredImage {
            bucket_url: self.bucket_url(&object_name),
            relative_path,
        })
    }

    async fn image_url(
        &self,
        image_path: &str,
        expires_in: Duration,
    ) -> Result<Option<String>, StorageError> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(remote)?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::object_name(image_path))
            .presigned(presigning)
            .await
            .map_err(remote)?;
        Ok(Some(request.uri().to_string()))
    }

    async fn delete_image(&self, image_path: &str) -> Result<bool, StorageError> {
        let object_name = Self::object_name(image_path);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_name)
            .send()
            .await
            .map_err(remote)?;
        tracing::info!(object = %object_name, "Image deleted from Oracle Cloud");
        Ok(true)
    }

    async fn health_check(&self) -> StorageHealth {
        let mut health = StorageHealth {
            storage_type: StorageKind::OracleCloud.as_str().to_string(),
            status: "healthy".to_string(),
            bucket: self.bucket.clone(),
            namespace: Some(self.namespace.clone()),
            region: Some(self.region.clone()),
            auth_type: Some(self.auth_type.clone()),
            ..Default::default()
        };
        if let Err(e) = self.client.head_bucket().bucket(&self.bucket).send().await {
            health.status = "unhealthy".to_string();
            health.error = Some(DisplayErrorContext(&e).to_string());
        }
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> OciObjectStore {
        let config = OracleConfig {
            namespace: "acme".to_string(),
            bucket: "webhook_cameras_prod".to_string(),
            region: "sa-bogota-1".to_string(),
            auth_type: "customer_secret_key".to_string(),
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
        };
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.s3_compat_endpoint())
            .credentials_provider(Credentials::new("key", "secret", None, None, "test"))
            .force_path_style(true)
            .build();
        OciObjectStore::new(Client::from_conf(s3_config), &config, "worker-1")
    }

    #[test]
    fn builds_public_bucket_url() {
        assert_eq!(
            store().bucket_url("evidencias_neural/2024-05-01/a.jpg"),
            "https://acme.objectstorage.sa-bogota-1.oci.customer-oci.com/n/acme/b/webhook_cameras_prod/o/evidencias_neural/2024-05-01/a.jpg"
        );
    }

    #[tokio::test]
    async fn presigns_without_network() {
        let url = store()
            .image_url("2024-05-01/a.jpg", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        assert!(url.starts_with(
            "https://acme.compat.objectstorage.sa-bogota-1.oraclecloud.com/webhook_cameras_prod/evidencias_neural/2024-05-01/a.jpg?"
        ));
        assert!(url.contains("X-Amz-Expires=300"));
    }
}
