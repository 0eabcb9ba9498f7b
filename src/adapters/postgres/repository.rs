//! PostgreSQL `EventRepository` implementation.

use super::pool::{Endpoint, PgPools};
use super::{is_auth_error, SCHEMA};
use crate::config::DatabaseConfig;
use crate::domain::event::{EventStats, NewDetection, NewRejection, StoredDetection, CAMERA_BRAND};
use crate::ports::repository::{EventRepository, RepositoryError};
use crate::ports::secrets::CredentialRefresher;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::Row;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

const DETECTION_COLUMNS: &str = "id, plate, image_url, camera_brand, camera_id, camera_location, \
     violation_type, vehicle_type, direction, confidence::float8 AS confidence, capture_time, \
     created_at, raw_data";

/// Detections and rejections stored in tables shared with the other webhook services.
pub struct PgEventRepository {
    config: DatabaseConfig,
    worker_id: String,
    pools: RwLock<PgPools>,
    refresher: OnceLock<Arc<dyn CredentialRefresher>>,
}

impl PgEventRepository {
    /// Open both pools and make sure the tables exist.
    pub async fn connect(
        config: DatabaseConfig,
        password: &str,
        worker_id: &str,
    ) -> Result<Self, RepositoryError> {
        let pools = PgPools::connect(&config, password, worker_id).await?;
        let repository = Self::with_pools(config, worker_id, pools);
        repository.ensure_schema().await?;
        Ok(repository)
    }

    fn with_pools(config: DatabaseConfig, worker_id: &str, pools: PgPools) -> Self {
        Self {
            config,
            worker_id: worker_id.to_string(),
            pools: RwLock::new(pools),
            refresher: OnceLock::new(),
        }
    }

    /// Registers who to ask for a new password when authentication fails.
    pub fn set_credential_refresher(&self, refresher: Arc<dyn CredentialRefresher>) {
        if self.refresher.set(refresher).is_err() {
            tracing::warn!("Credential refresher already registered");
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        let pool = self.pools.read().await.get(Endpoint::Write);
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        tracing::info!("detected_plates_wh_devices and rejected_plates_wh_cameras ensured");
        Ok(())
    }

    /// Replace both pools with ones using `password`. The new pools connect
    /// on first use.
    pub async fn recreate_pools(&self, password: &str) {
        tracing::info!("Recreating connection pools with refreshed credentials");
        let fresh = PgPools::connect_lazy(&self.config, password, &self.worker_id);
        let old = std::mem::replace(&mut *self.pools.write().await, fresh);
        old.close().await;
    }

    async fn refresh_credentials(&self) -> Result<(), RepositoryError> {
        let Some(refresher) = self.refresher.get() else {
            return Err(RepositoryError::CredentialRefresh(
                "no credential refresher registered".to_string(),
            ));
        };
        let password = refresher
            .refresh_password()
            .await
            .map_err(|e| RepositoryError::CredentialRefresh(e.to_string()))?;
        self.recreate_pools(&password).await;
        tracing::info!("Database credentials refreshed and pools recreated");
        Ok(())
    }

    /// Runs `op` against a pool, refreshing credentials and retrying once
    /// when the database rejects them.
    async fn run<T, F>(&self, endpoint: Endpoint, operation: &str, op: F) -> Result<T, RepositoryError>
    where
        F: Fn(PgPool) -> BoxFuture<'static, Result<T, sqlx::Error>>,
    {
        let pool = self.pools.read().await.get(endpoint);
        match op(pool).await {
            Ok(value) => Ok(value),
            Err(e) if is_auth_error(&e) && self.refresher.get().is_some() => {
                tracing::warn!(operation, error = %e, "Authentication failed, refreshing credentials");
                self.refresh_credentials().await?;
                let pool = self.pools.read().await.get(endpoint);
                op(pool).await.map_err(|retry| {
                    tracing::error!(operation, error = %retry, "Retry after credential refresh failed");
                    RepositoryError::from(retry)
                })
            }
            Err(e) => {
                tracing::error!(operation, error = %e, "Database operation failed");
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn save_event(&self, event: &NewDetection) -> Result<i32, RepositoryError> {
        let event = event.clone();
        let id = self
            .run(Endpoint::Write, "save_event", move |pool| {
                let e = event.clone();
                Box::pin(async move {
                    sqlx::query_scalar::<_, i32>(
                        "INSERT INTO detected_plates_wh_devices (
                            plate, image_url, camera_brand, camera_id, camera_location,
                            violation_type, vehicle_type, direction, confidence,
                            capture_time, created_at, raw_data, ocr_correction_report
                        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                        RETURNING id",
                    )
                    .bind(e.plate)
                    .bind(e.image_url)
                    .bind(e.camera_brand)
                    .bind(e.camera_id)
                    .bind(e.camera_location)
                    .bind(e.violation_type)
                    .bind(e.vehicle_type)
                    .bind(e.direction)
                    .bind(e.confidence)
                    .bind(e.capture_time)
                    .bind(Utc::now())
                    .bind(Json(e.raw_data))
                    .bind(e.ocr_correction_report)
                    .fetch_one(&pool)
                    .await
                })
            })
            .await?;
        tracing::info!(id, "Detection saved to detected_plates_wh_devices");
        Ok(id)
    }

    async fn save_rejection(&self, rejection: &NewRejection) -> Result<i32, RepositoryError> {
        let rejection = rejection.clone();
        let id = self
            .run(Endpoint::Write, "save_rejection", move |pool| {
                let r = rejection.clone();
                Box::pin(async move {
                    sqlx::query_scalar::<_, i32>(
                        "INSERT INTO rejected_plates_wh_cameras (
                            camera_brand, camera_id, raw_plate_text, confidence,
                            rejection_reason, rejection_type, country, vehicle_type, raw_data
                        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        RETURNING id",
                    )
                    .bind(r.camera_brand)
                    .bind(r.camera_id)
                    .bind(r.raw_plate_text)
                    .bind(r.confidence)
                    .bind(r.rejection_reason)
                    .bind(r.rejection_type)
                    .bind(r.country)
                    .bind(r.vehicle_type)
                    .bind(r.raw_data)
                    .fetch_one(&pool)
                    .await
                })
            })
            .await?;
        tracing::info!(id, "Rejected plate saved");
        Ok(id)
    }

    async fn recent_events(&self, limit: i64) -> Result<Vec<StoredDetection>, RepositoryError> {
        self.run(Endpoint::Read, "recent_events", move |pool| {
            Box::pin(async move {
                sqlx::query_as::<_, StoredDetection>(&format!(
                    "SELECT {} FROM detected_plates_wh_devices
                     WHERE camera_brand = $1
                     ORDER BY created_at DESC
                     LIMIT $2",
                    DETECTION_COLUMNS
                ))
                .bind(CAMERA_BRAND)
                .bind(limit)
                .fetch_all(&pool)
                .await
            })
        })
        .await
    }

    async fn events_by_plate(
        &self,
        plate: &str,
        limit: i64,
    ) -> Result<Vec<StoredDetection>, RepositoryError> {
        let plate = plate.to_string();
        self.run(Endpoint::Read, "events_by_plate", move |pool| {
            let plate = plate.clone();
            Box::pin(async move {
                sqlx::query_as::<_, StoredDetection>(&format!(
                    "SELECT {} FROM detected_plates_wh_devices
                     WHERE plate = $1 AND camera_brand = $2
                     ORDER BY created_at DESC
                     LIMIT $3",
                    DETECTION_COLUMNS
                ))
                .bind(plate)
                .bind(CAMERA_BRAND)
                .bind(limit)
                .fetch_all(&pool)
                .await
            })
        })
        .await
    }

    async fn event_stats(&self) -> Result<EventStats, RepositoryError> {
        self.run(Endpoint::Read, "event_stats", |pool| {
            Box::pin(async move {
                let row = sqlx::query(
                    "SELECT
                        COUNT(*) AS total_events,
                        COUNT(CASE WHEN DATE(created_at) = CURRENT_DATE THEN 1 END) AS events_today,
                        COUNT(DISTINCT plate) FILTER (WHERE plate IS NOT NULL AND plate != '') AS unique_plates,
                        COUNT(CASE WHEN created_at >= NOW() - INTERVAL '1 hour' THEN 1 END) AS events_last_hour
                     FROM detected_plates_wh_devices
                     WHERE camera_brand = $1",
                )
                .bind(CAMERA_BRAND)
                .fetch_one(&pool)
                .await?;
                Ok::<_, sqlx::Error>(EventStats {
                    total_events: row.try_get("total_events")?,
                    events_today: row.try_get("events_today")?,
                    unique_plates: row.try_get("unique_plates")?,
                    events_last_hour: row.try_get("events_last_hour")?,
                })
            })
        })
        .await
    }

    async fn close(&self) {
        self.pools.read().await.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::secrets::MockCredentialRefresher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Attempt = BoxFuture<'static, Result<i32, sqlx::Error>>;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            name: "plates".to_string(),
            user: "webhook".to_string(),
            password: None,
            write_host: "127.0.0.1".to_string(),
            write_port: 1,
            read_host: "127.0.0.1".to_string(),
            read_port: 1,
            min_connections: 0,
            max_connections: 2,
            query_timeout: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(1),
        }
    }

    fn repository(refresher: Option<MockCredentialRefresher>) -> PgEventRepository {
        let config = config();
        let pools = PgPools::connect_lazy(&config, "expired", "test");
        let repository = PgEventRepository::with_pools(config, "test", pools);
        if let Some(refresher) = refresher {
            repository.set_credential_refresher(Arc::new(refresher));
        }
        repository
    }

    fn auth_failure() -> sqlx::Error {
        sqlx::Error::Protocol("password authentication failed for user \"webhook\"".into())
    }

    /// Fails with `first` on the first call and returns `Ok(7)` afterwards.
    fn flaky(
        attempts: &Arc<AtomicUsize>,
        first: fn() -> sqlx::Error,
    ) -> impl Fn(PgPool) -> Attempt {
        let attempts = attempts.clone();
        move |_pool: PgPool| -> Attempt {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if attempt == 0 {
                    Err(first())
                } else {
                    Ok(7)
                }
            })
        }
    }

    #[tokio::test]
    async fn auth_error_refreshes_once_and_retries() {
        let mut refresher = MockCredentialRefresher::new();
        refresher
            .expect_refresh_password()
            .times(1)
            .returning(|| Ok("rotated".to_string()));
        let repository = repository(Some(refresher));

        let attempts = Arc::new(AtomicUsize::new(0));
        let result = repository
            .run(Endpoint::Write, "save_event", flaky(&attempts, auth_failure))
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_happens_only_once() {
        let mut refresher = MockCredentialRefresher::new();
        refresher
            .expect_refresh_password()
            .times(1)
            .returning(|| Ok("still-wrong".to_string()));
        let repository = repository(Some(refresher));

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let result = repository
            .run(Endpoint::Read, "recent_events", move |_pool: PgPool| -> Attempt {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(auth_failure()) })
            })
            .await;

        assert!(matches!(result, Err(RepositoryError::Database(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let mut refresher = MockCredentialRefresher::new();
        refresher.expect_refresh_password().never();
        let repository = repository(Some(refresher));

        let attempts = Arc::new(AtomicUsize::new(0));
        let result = repository
            .run(Endpoint::Write, "save_event", flaky(&attempts, || sqlx::Error::RowNotFound))
            .await;

        assert!(matches!(result, Err(RepositoryError::Database(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_error_without_refresher_is_returned() {
        let repository = repository(None);

        let attempts = Arc::new(AtomicUsize::new(0));
        let result = repository
            .run(Endpoint::Write, "save_event", flaky(&attempts, auth_failure))
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
