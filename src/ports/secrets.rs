use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SecretError {
    #[error("Secret '{0}' not found")]
    NotFound(String),
    #[error("Not authorized to read secret '{0}'")]
    Unauthorized(String),
    #[error("Secret backend error: {0}")]
    Backend(String),
}

/// Backend holding secret values (OCI Vault, mounted secrets, ...).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<String, SecretError>;

    /// Renew whatever identity the backend uses after an authorization failure.
    async fn reauthenticate(&self) -> Result<(), SecretError> {
        Ok(())
    }
}

/// Supplies a fresh database password after an authentication failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh_password(&self) -> Result<String, SecretError>;
}
