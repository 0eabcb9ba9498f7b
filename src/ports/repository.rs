use crate::domain::event::{EventStats, NewDetection, NewRejection, StoredDetection};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Database credentials could not be refreshed: {0}")]
    CredentialRefresh(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert an accepted detection and return its id.
    async fn save_event(&self, event: &NewDetection) -> Result<i32, RepositoryError>;

    /// Insert a rejected plate into the audit table and return its id.
    async fn save_rejection(&self, rejection: &NewRejection) -> Result<i32, RepositoryError>;

    /// Latest detections of this camera brand, newest first.
    async fn recent_events(&self, limit: i64) -> Result<Vec<StoredDetection>, RepositoryError>;

    async fn events_by_plate(
        &self,
        plate: &str,
        limit: i64,
    ) -> Result<Vec<StoredDetection>, RepositoryError>;

    async fn event_stats(&self) -> Result<EventStats, RepositoryError>;

    async fn close(&self);
}
