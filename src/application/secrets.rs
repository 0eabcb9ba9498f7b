//! Cached access to vault secrets.

use crate::ports::secrets::{CredentialRefresher, SecretError, SecretSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct CachedSecret {
    value: String,
    fetched_at: Instant,
}

/// TTL cache in front of a [`SecretSource`].
pub struct SecretProvider<S> {
    source: S,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedSecret>>,
}

impl<S: SecretSource> SecretProvider<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value unless it expired or `force_refresh` is set.
    /// An authorization failure triggers one reauthentication and retry.
    pub async fn get_secret(&self, name: &str, force_refresh: bool) -> Result<String, SecretError> {
        let mut cache = self.cache.lock().await;
        if !force_refresh {
            if let Some(cached) = cache.get(name) {
                if cached.fetched_at.elapsed() < self.ttl {
                    tracing::debug!(secret = name, "Secret served from cache");
                    return Ok(cached.value.clone());
                }
            }
        }

        let value = match self.source.fetch(name).await {
            Ok(value) => value,
            Err(SecretError::Unauthorized(_)) => {
                tracing::warn!(secret = name, "Vault authorization failed, reauthenticating");
                self.source.reauthenticate().await?;
                self.source.fetch(name).await?
            }
            Err(e) => {
                tracing::error!(secret = name, error = %e, "Failed to fetch secret");
                return Err(e);
            }
        };

        cache.insert(
            name.to_string(),
            CachedSecret {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        tracing::info!(secret = name, "Secret fetched from vault");
        Ok(value)
    }

    pub async fn invalidate_all(&self) {
        self.cache.lock().await.clear();
    }
}

/// Re-reads the database password secret, bypassing the cache.
pub struct VaultPasswordRefresher<S> {
    provider: Arc<SecretProvider<S>>,
    secret_name: String,
}

impl<S: SecretSource> VaultPasswordRefresher<S> {
    pub fn new(provider: Arc<SecretProvider<S>>, secret_name: impl Into<String>) -> Self {
        Self {
            provider,
            secret_name: secret_name.into(),
        }
    }
}

#[async_trait]
impl<S: SecretSource> CredentialRefresher for VaultPasswordRefresher<S> {
    async fn refresh_password(&self) -> Result<String, SecretError> {
        tracing::info!("Refreshing database password from vault");
        self.provider.invalidate_all().await;
        self.provider.get_secret(&self.secret_name, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::secrets::MockSecretSource;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[tokio::test]
    async fn caches_until_ttl_expires() {
        let mut source = MockSecretSource::new();
        source
            .expect_fetch()
            .with(eq("db"))
            .times(1)
            .returning(|_| Ok("pw".to_string()));

        let provider = SecretProvider::new(source, Duration::from_secs(60));
        assert_eq!(provider.get_secret("db", false).await.unwrap(), "pw");
        assert_eq!(provider.get_secret("db", false).await.unwrap(), "pw");
    }

    #[tokio::test]
    async fn zero_ttl_and_force_refresh_fetch_again() {
        let mut source = MockSecretSource::new();
        source
            .expect_fetch()
            .times(2)
            .returning(|_| Ok("pw".to_string()));

        let provider = SecretProvider::new(source, Duration::ZERO);
        provider.get_secret("db", false).await.unwrap();
        provider.get_secret("db", true).await.unwrap();
    }

    #[tokio::test]
    async fn reauthenticates_once_on_unauthorized() {
        let mut seq = Sequence::new();
        let mut source = MockSecretSource::new();
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Err(SecretError::Unauthorized(name.to_string())));
        source
            .expect_reauthenticate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("rotated".to_string()));

        let provider = SecretProvider::new(source, Duration::from_secs(60));
        assert_eq!(provider.get_secret("db", false).await.unwrap(), "rotated");
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let mut source = MockSecretSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|name| Err(SecretError::NotFound(name.to_string())));
        source.expect_reauthenticate().never();

        let provider = SecretProvider::new(source, Duration::from_secs(60));
        assert!(matches!(
            provider.get_secret("db", false).await,
            Err(SecretError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn refresher_bypasses_cache() {
        let mut seq = Sequence::new();
        let mut source = MockSecretSource::new();
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("old".to_string()));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("new".to_string()));

        let provider = Arc::new(SecretProvider::new(source, Duration::from_secs(3600)));
        assert_eq!(provider.get_secret("db", false).await.unwrap(), "old");

        let refresher = VaultPasswordRefresher::new(provider.clone(), "db");
        assert_eq!(refresher.refresh_password().await.unwrap(), "new");
        assert_eq!(provider.get_secret("db", false).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn refresher_clears_every_cached_secret() {
        let mut source = MockSecretSource::new();
        source
            .expect_fetch()
            .withf(|name| name == "api-key")
            .times(2)
            .returning(|_| Ok("key".to_string()));
        source
            .expect_fetch()
            .withf(|name| name == "db")
            .times(2)
            .returning(|_| Ok("pw".to_string()));

        let provider = Arc::new(SecretProvider::new(source, Duration::from_secs(3600)));
        provider.get_secret("api-key", false).await.unwrap();
        provider.get_secret("db", false).await.unwrap();

        let refresher = VaultPasswordRefresher::new(provider.clone(), "db");
        assert_eq!(refresher.refresh_password().await.unwrap(), "pw");
        assert_eq!(provider.get_secret("api-key", false).await.unwrap(), "key");
    }
}
