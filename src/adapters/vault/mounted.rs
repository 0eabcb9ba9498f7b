//! Vault secrets mounted as files by the Secrets Store CSI driver.
//!
//! Each secret is a file named after it inside the mount directory. The
//! driver rotates the files in place, so every fetch reads the file again.

use crate::ports::secrets::{SecretError, SecretSource};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct MountedSecretSource {
    dir: PathBuf,
}

impl MountedSecretSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SecretSource for MountedSecretSource {
    async fn fetch(&self, name: &str) -> Result<String, SecretError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(SecretError::NotFound(name.to_string()));
        }
        let path = self.dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => {
                tracing::debug!(secret = name, "Secret read from mount");
                Ok(value.trim_end().to_string())
            }
            Err(e) => Err(match e.kind() {
                ErrorKind::NotFound => SecretError::NotFound(name.to_string()),
                ErrorKind::PermissionDenied => SecretError::Unauthorized(name.to_string()),
                _ => SecretError::Backend(format!("{}: {}", path.display(), e)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_and_trims_mounted_secret() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("db-pass"), "s3cret\n").unwrap();

        let source = MountedSecretSource::new(dir.path());
        assert_eq!(source.fetch("db-pass").await.unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn missing_secret_is_not_found() {
        let dir = tempdir().unwrap();
        let source = MountedSecretSource::new(dir.path());
        assert!(matches!(
            source.fetch("absent").await,
            Err(SecretError::NotFound(name)) if name == "absent"
        ));
    }

    #[tokio::test]
    async fn refuses_names_outside_the_mount() {
        let dir = tempdir().unwrap();
        let source = MountedSecretSource::new(dir.path().join("mount"));
        assert!(matches!(
            source.fetch("../etc/passwd").await,
            Err(SecretError::NotFound(_))
        ));
        assert!(source.reauthenticate().await.is_ok());
    }
}
