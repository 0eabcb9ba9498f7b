//! Camera event processing: normalize the plate, keep the evidence, record
//! the outcome.

use crate::domain::event::{
    decode_image, ocr_correction_report, parse_capture_time, CameraEvent, NewDetection,
    NewRejection, PayloadError, CAMERA_BRAND,
};
use crate::domain::plate::{normalize_plate, NormalizationResult, PlateRules};
use crate::ports::repository::EventRepository;
use crate::ports::storage::{EvidenceStore, StorageHealth};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const PLATE_NOT_DETECTED: &str = "No detectada";
const UNKNOWN_PLATE_PREFIX: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedEvent {
    pub event_id: Option<i32>,
    pub image_urls: Vec<String>,
    pub normalized_plate: Option<String>,
    pub ocr_corrections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedEvent {
    pub raw_plate: Option<String>,
    pub confidence: f64,
    pub rejection_reason: String,
}

/// Body returned to the camera.
#[derive(Debug, Clone, Serialize)]
pub struct EventResponse {
    pub status: &'static str,
    pub events_created: usize,
    pub events_rejected: usize,
    pub plate: String,
    /// Confidence exactly as the camera sent it.
    pub confidence: Value,
    pub capture_time: String,
    pub camera_name: String,
    pub total_events: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<CreatedEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<RejectedEvent>,
}

impl EventResponse {
    /// Id of the first stored detection, if any.
    pub fn event_id(&self) -> Option<i32> {
        self.events.first().and_then(|e| e.event_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorHealth {
    pub processor: &'static str,
    pub total_events: u64,
    pub last_event_time: Option<DateTime<Utc>>,
    pub storage: StorageHealth,
}

pub struct EventProcessor {
    storage: Arc<dyn EvidenceStore>,
    repository: Arc<dyn EventRepository>,
    rules: PlateRules,
    total_events: AtomicU64,
    last_event_time: Mutex<Option<DateTime<Utc>>>,
}

impl EventProcessor {
    pub fn new(
        storage: Arc<dyn EvidenceStore>,
        repository: Arc<dyn EventRepository>,
        rules: PlateRules,
    ) -> Self {
        Self {
            storage,
            repository,
            rules,
            total_events: AtomicU64::new(0),
            last_event_time: Mutex::new(None),
        }
    }

    pub fn storage(&self) -> &Arc<dyn EvidenceStore> {
        &self.storage
    }

    pub fn repository(&self) -> &Arc<dyn EventRepository> {
        &self.repository
    }

    /// Detections stored since startup.
    pub fn total_events_processed(&self) -> u64 {
        self.total_events.load(Ordering::Relaxed)
    }

    pub fn last_event_time(&self) -> Option<DateTime<Utc>> {
        self.last_event_time
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// Handle one webhook body. Only an unreadable payload is an error;
    /// storage and database failures are logged and leave the event partial.
    pub async fn process(&self, body: &[u8]) -> Result<EventResponse, PayloadError> {
        let event = CameraEvent::from_json(body)?;
        tracing::info!(
            plate = event.plate.as_deref().unwrap_or(PLATE_NOT_DETECTED),
            confidence = event.confidence,
            timestamp = %event.timestamp,
            camera = %event.camera_name,
            main_image = event.image.is_some(),
            evidences = event.evidences.len(),
            "Neural event received"
        );

        // Neural cameras report neither country nor vehicle type.
        let result = normalize_plate(
            event.plate.as_deref(),
            event.confidence,
            None,
            None,
            &self.rules,
        );
        tracing::debug!(
            valid = result.is_valid(),
            colombian = result.is_colombian,
            normalized = ?result.normalized_plate,
            ocr = result.ocr_corrections,
            "Plate normalized"
        );

        let mut events = Vec::new();
        let mut rejections = Vec::new();
        match &result.rejection {
            Some(rejection) => {
                tracing::warn!(kind = rejection.kind.as_str(), reason = %rejection.reason, "Plate rejected");
                if !self.rules.strict_mode {
                    self.record_rejection(&event, &result).await;
                }
                rejections.push(RejectedEvent {
                    raw_plate: event.plate.clone(),
                    confidence: result.confidence,
                    rejection_reason: rejection.reason.clone(),
                });
            }
            None => events.push(self.record_detection(&event, &result).await),
        }

        let created = events.len() as u64;
        let total_events = self.total_events.fetch_add(created, Ordering::Relaxed) + created;
        let now = Utc::now();
        match self.last_event_time.lock() {
            Ok(mut guard) => *guard = Some(now),
            Err(poisoned) => *poisoned.into_inner() = Some(now),
        }

        tracing::info!(
            created = events.len(),
            rejected = rejections.len(),
            "Neural event processed"
        );

        Ok(EventResponse {
            status: "ok",
            events_created: events.len(),
            events_rejected: rejections.len(),
            plate: event
                .plate
                .clone()
                .unwrap_or_else(|| PLATE_NOT_DETECTED.to_string()),
            confidence: event.raw_confidence,
            capture_time: event.timestamp,
            camera_name: event.camera_name,
            total_events,
            timestamp: now,
            events,
            rejections,
        })
    }

    async fn record_rejection(&self, event: &CameraEvent, result: &NormalizationResult) {
        let (Some(rejection), Some(rejection_type)) =
            (&result.rejection, result.audit_rejection_type(&self.rules))
        else {
            return;
        };
        let record = NewRejection {
            camera_brand: CAMERA_BRAND.to_string(),
            camera_id: event.camera_name.clone(),
            raw_plate_text: event.plate.clone(),
            confidence: result.confidence,
            rejection_reason: rejection.reason.clone(),
            rejection_type: rejection_type.to_string(),
            country: None,
            vehicle_type: None,
            raw_data: event.raw_data.to_string(),
        };
        match self.repository.save_rejection(&record).await {
            Ok(id) => tracing::info!(id, "Rejection recorded"),
            Err(e) => tracing::error!(error = %e, "Failed to record rejection"),
        }
    }

    async fn record_detection(&self, event: &CameraEvent, result: &NormalizationResult) -> CreatedEvent {
        let image_urls = self.save_images(event, result).await;

        let record = NewDetection {
            plate: result.normalized_plate.clone(),
            confidence: result.confidence,
            capture_time: parse_capture_time(&event.timestamp),
            camera_id: event.camera_name.clone(),
            camera_brand: CAMERA_BRAND.to_string(),
            camera_location: None,
            image_url: image_urls.first().cloned(),
            vehicle_type: result.vehicle_type.clone(),
            direction: None,
            violation_type: None,
            raw_data: event.raw_data.clone(),
            ocr_correction_report: ocr_correction_report(
                event.plate.as_deref(),
                result.normalized_plate.as_deref(),
                result.ocr_corrections,
            ),
        };

        let event_id = match self.repository.save_event(&record).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(error = %e, plate = ?record.plate, "Failed to store detection");
                None
            }
        };
        tracing::info!(event_id = ?event_id, plate = ?record.plate, "Detection stored");

        CreatedEvent {
            event_id,
            image_urls,
            normalized_plate: result.normalized_plate.clone(),
            ocr_corrections: result.ocr_corrections,
        }
    }

    /// Uploads the main image and every evidence concurrently. The returned
    /// URLs keep the payload order; failed uploads are skipped.
    async fn save_images(&self, event: &CameraEvent, result: &NormalizationResult) -> Vec<String> {
        let stamp = || Utc::now().format("%H%M%S_%6f").to_string();
        let mut images = Vec::new();
        if let Some(data) = event.image.as_deref().and_then(decode_image) {
            images.push((format!("detection_{}.jpg", stamp()), data));
        }
        for (idx, encoded) in event.evidences.iter().enumerate() {
            if let Some(data) = decode_image(encoded) {
                images.push((format!("evidence_{}_{}.jpg", idx + 1, stamp()), data));
            }
        }

        let prefix = result
            .normalized_plate
            .as_deref()
            .unwrap_or(UNKNOWN_PLATE_PREFIX);
        let uploads = images.iter().map(|(name, data)| async move {
            match self.storage.save_image(data, name, prefix).await {
                Ok(stored) => {
                    tracing::info!(path = %stored.relative_path, "Evidence image saved");
                    Some(stored.bucket_url)
                }
                Err(e) => {
                    tracing::error!(image = %name, error = %e, "Failed to save evidence image");
                    None
                }
            }
        });
        join_all(uploads).await.into_iter().flatten().collect()
    }

    pub async fn health_check(&self) -> ProcessorHealth {
        ProcessorHealth {
            processor: "healthy",
            total_events: self.total_events_processed(),
            last_event_time: self.last_event_time(),
            storage: self.storage.health_check().await,
        }
    }
}
