use super::{ApiError, AppState, SERVICE_NAME, VERSION};
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::ops::RangeInclusive;
use std::time::Duration;

const LIMIT_RANGE: RangeInclusive<i64> = 1..=100;
const DEFAULT_LIMIT: i64 = 10;
const EXPIRES_RANGE: RangeInclusive<i64> = 60..=86_400;
const DEFAULT_EXPIRES_IN: i64 = 3600;
const TEST_IMAGE_EXPIRES_IN: Duration = Duration::from_secs(300);

/// Smallest valid JPEG (1x1 px), used by the storage round-trip test.
const TEST_JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00\x01\x01\x01\x00H\x00H\x00\x00\
\xff\xdb\x00C\x00\x08\x06\x06\x07\x06\x05\x08\x07\x07\x07\t\t\x08\n\x0c\x14\r\x0c\x0b\x0b\
\x0c\x19\x12\x13\x0f\x14\x1d\x1a\x1f\x1e\x1d\x1a\x1c\x1c $.' \",#\x1c\x1c(7),01444\x1f'9=82<.342\
\xff\xc0\x00\x11\x08\x00\x01\x00\x01\x01\x01\x11\x00\x02\x11\x01\x03\x11\x01\
\xff\xc4\x00\x14\x00\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x08\
\xff\xc4\x00\x14\x10\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
\xff\xda\x00\x0c\x03\x01\x00\x02\x11\x03\x11\x00\x3f\x00\xaa\xff\xd9";

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<i64>,
}

impl LimitQuery {
    fn validated(&self) -> Result<i64, ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !LIMIT_RANGE.contains(&limit) {
            return Err(ApiError::BadRequest(format!(
                "limit must be between {} and {}",
                LIMIT_RANGE.start(),
                LIMIT_RANGE.end()
            )));
        }
        Ok(limit)
    }
}

#[derive(Debug, Deserialize)]
pub struct ExpiryQuery {
    expires_in: Option<i64>,
}

impl ExpiryQuery {
    fn validated(&self) -> Result<u64, ApiError> {
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        if !EXPIRES_RANGE.contains(&expires_in) {
            return Err(ApiError::BadRequest(format!(
                "expires_in must be between {} and {}",
                EXPIRES_RANGE.start(),
                EXPIRES_RANGE.end()
            )));
        }
        Ok(expires_in.unsigned_abs())
    }
}

pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "status": "active",
        "worker_id": state.config.worker_id,
        "storage_type": state.config.storage_type(),
        "bucket": state.config.bucket_label(),
        "timestamp": Utc::now(),
    }))
}

pub async fn metrics() -> Json<&'static str> {
    Json("ok")
}

/// Cameras always get 200 once the payload is readable, whether the plate
/// was accepted or rejected.
pub async fn receive_event(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    match state.processor.process(&body).await {
        Ok(response) => {
            tracing::info!(
                event_id = ?response.event_id(),
                created = response.events_created,
                rejected = response.events_rejected,
                "Event handled"
            );
            let body = serde_json::to_value(&response).map_err(|e| {
                tracing::error!(error = %e, "Failed to serialize event response");
                ApiError::Internal
            })?;
            Ok(Json(body))
        }
        Err(e) => {
            tracing::warn!(error = %e, bytes = body.len(), "Malformed camera payload");
            Err(ApiError::BadRequest(e.to_string()))
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.health.snapshot();
    if !state.health.is_healthy() {
        return Err(ApiError::Unavailable("Service unhealthy".to_string()));
    }
    let processor = state.processor.health_check().await;
    Ok(Json(json!({
        "status": snapshot.status,
        "worker_id": snapshot.worker_id,
        "node_name": snapshot.node_name,
        "services": snapshot.services,
        "total_events": processor.total_events,
        "timestamp": snapshot.timestamp,
        "storage": processor.storage,
    })))
}

pub async fn ready(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let storage = state.processor.storage().health_check().await;
    if !storage.is_healthy() {
        tracing::warn!(error = ?storage.error, "Storage not ready");
        return Err(ApiError::Unavailable("Storage unavailable".to_string()));
    }
    Ok(Json(json!({
        "status": "ready",
        "storage_type": state.config.storage_type(),
        "bucket": state.config.bucket_label(),
        "timestamp": Utc::now(),
    })))
}

pub async fn recent_events(
    State(state): State<AppState>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let limit = query.validated()?;
    let events = state.processor.repository().recent_events(limit).await?;
    Ok(Json(json!({
        "total": events.len(),
        "eventos": events,
        "timestamp": Utc::now(),
    })))
}

pub async fn events_by_plate(
    State(state): State<AppState>,
    Path(plate): Path<String>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let limit = query.validated()?;
    let events = state
        .processor
        .repository()
        .events_by_plate(&plate, limit)
        .await?;
    Ok(Json(json!({
        "plate": plate,
        "total": events.len(),
        "eventos": events,
        "timestamp": Utc::now(),
    })))
}

pub async fn statistics(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.processor.repository().event_stats().await?;
    Ok(Json(json!({
        "total_events": stats.total_events,
        "events_today": stats.events_today,
        "unique_plates": stats.unique_plates,
        "events_last_hour": stats.events_last_hour,
        "session_events": state.processor.total_events_processed(),
        "last_event_time": state.processor.last_event_time(),
        "worker_id": state.config.worker_id,
        "storage_type": state.config.storage_type(),
        "bucket": state.config.bucket_label(),
        "timestamp": Utc::now(),
    })))
}

pub async fn image_url(
    State(state): State<AppState>,
    Path(image_path): Path<String>,
    query: Result<Query<ExpiryQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let expires_in = query.validated()?;

    let url = state
        .processor
        .storage()
        .image_url(&image_path, Duration::from_secs(expires_in))
        .await?
        .ok_or_else(|| ApiError::NotFound("Image not found".to_string()))?;

    Ok(Json(json!({
        "image_path": image_path,
        "url": url,
        "expires_in": expires_in,
        "storage_type": state.config.storage_type(),
        "timestamp": Utc::now(),
    })))
}

pub async fn configuration(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "database": config.database_info(),
        "storage": config.storage_info(),
        "plate_rules": config.plate_rules,
        "worker_id": config.worker_id,
        "node_name": config.node_name,
        "kubernetes": config.is_kubernetes(),
        "log_level": config.log_level,
        "version": VERSION,
    }))
}

/// Round-trips a tiny image through the evidence store. Failures are reported in
/// the body rather than as an HTTP error.
pub async fn storage_test(State(state): State<AppState>) -> Json<Value> {
    let storage = state.processor.storage();
    let stored = match storage.save_image(TEST_JPEG, "TEST.jpg", "TEST").await {
        Ok(stored) => stored,
        Err(e) => {
            tracing::error!(error = %e, "Storage test failed");
            return Json(json!({
                "status": "error",
                "error": e.to_string(),
                "storage_type": state.config.storage_type(),
                "timestamp": Utc::now(),
            }));
        }
    };

    let presigned = storage
        .image_url(&stored.relative_path, TEST_IMAGE_EXPIRES_IN)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Storage test could not sign the image");
            None
        });
    let health = storage.health_check().await;
    let deleted = storage
        .delete_image(&stored.relative_path)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Storage test could not delete the image");
            false
        });

    Json(json!({
        "status": "success",
        "storage_type": state.config.storage_type(),
        "bucket": state.config.bucket_label(),
        "test_image_path": stored.relative_path,
        "test_image_url": stored.bucket_url,
        "test_presigned_url": presigned,
        "test_deleted": deleted,
        "health_check": health,
        "timestamp": Utc::now(),
    }))
}
