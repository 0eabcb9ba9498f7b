//! Camera payloads and the records derived from them.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CAMERA_BRAND: &str = "neural";

/// Prefix of every evidence object, in the bucket and in public local URLs.
pub const EVIDENCE_PREFIX: &str = "evidencias_neural";

const NO_CORRECTIONS: &str = "No corrections applied";

/// Keys carrying image data, kept out of the `raw_data` audit column.
const IMAGE_KEYS: [&str; 2] = ["img", "Evidences"];

const FALLBACK_TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%d/%m/%Y %H:%M:%S", "%Y%m%d%H%M%S"];

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Payload must be a JSON object")]
    NotAnObject,
}

/// A detection as reported by a Neural camera (`infoplate` object).
#[derive(Debug, Clone)]
pub struct CameraEvent {
    pub plate: Option<String>,
    pub timestamp: String,
    /// Confidence exactly as sent by the camera, echoed back in responses.
    pub raw_confidence: Value,
    pub confidence: f64,
    pub camera_name: String,
    pub image: Option<String>,
    pub evidences: Vec<String>,
    /// `infoplate` without image fields.
    pub raw_data: Value,
}

impl CameraEvent {
    pub fn from_json(body: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(body)?;
        let root = value.as_object().ok_or(PayloadError::NotAnObject)?;
        let info = root
            .get("infoplate")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(Self::from_infoplate(info, Utc::now()))
    }

    fn from_infoplate(info: Map<String, Value>, received_at: DateTime<Utc>) -> Self {
        let text = |key: &str| info.get(key).and_then(Value::as_str).unwrap_or_default();

        let plate = match text("Plate") {
            "" | "UNKNOWN" => None,
            p => Some(p.to_string()),
        };
        let timestamp = match info.get("DateHour").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => received_at.to_rfc3339(),
        };
        let raw_confidence = info
            .get("confidence")
            .cloned()
            .unwrap_or_else(|| Value::String("0".to_string()));
        let confidence = parse_confidence(&raw_confidence);

        let image = Some(text("img")).filter(|s| !s.is_empty()).map(str::to_owned);
        let evidences = info
            .get("Evidences")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        item.pointer("/Evidence/imgEV")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    })
                    .collect()
            })
            .unwrap_or_default();

        let raw_data = Value::Object(
            info.iter()
                .filter(|(k, _)| !IMAGE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );

        Self {
            plate,
            timestamp,
            raw_confidence,
            confidence,
            camera_name: text("CamName").to_string(),
            image,
            evidences,
            raw_data,
        }
    }
}

/// Cameras send the confidence as a string or a number; anything else is 0.
pub fn parse_confidence(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v: &f64| v.is_finite()).unwrap_or(0.0)
}

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes a base64 image, dropping any `data:image/...;base64,` prefix.
pub fn decode_image(encoded: &str) -> Option<Vec<u8>> {
    if encoded.is_empty() {
        return None;
    }
    let payload = match encoded.split_once(',') {
        Some((_, data)) => data,
        None => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    match LENIENT_BASE64.decode(compact) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            tracing::error!(error = %e, "Failed to decode base64 image");
            None
        }
    }
}

/// Parses the `DateHour` field. Values without an offset are taken as UTC.
pub fn parse_capture_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = value.parse::<NaiveDateTime>() {
        return Some(Utc.from_utc_datetime(&naive));
    }
    FALLBACK_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Describes which characters OCR correction changed.
pub fn ocr_correction_report(
    original: Option<&str>,
    normalized: Option<&str>,
    corrections: usize,
) -> String {
    let (Some(original), Some(normalized)) = (original, normalized) else {
        return NO_CORRECTIONS.to_string();
    };
    if corrections == 0 || original == normalized {
        return NO_CORRECTIONS.to_string();
    }

    let clean = |s: &str| s.trim().to_uppercase().replace([' ', '-'], "");
    let original = clean(original);
    let normalized = clean(normalized);

    let details: Vec<String> = original
        .chars()
        .zip(normalized.chars())
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(i, (a, b))| format!("pos{}: {}->{}", i, a, b))
        .collect();

    if details.is_empty() {
        return NO_CORRECTIONS.to_string();
    }
    format!(
        "{} -> {} ({} corr: {})",
        original,
        normalized,
        corrections,
        details.join(", ")
    )
}

/// Object name of an evidence image: `<plate>_neural_<HHMMSS_micros>_<name>`.
pub fn evidence_file_name(now: DateTime<Utc>, plate_prefix: &str, image_name: &str) -> String {
    format!(
        "{}_{}_{}_{}",
        plate_prefix,
        CAMERA_BRAND,
        now.format("%H%M%S_%6f"),
        image_name
    )
}

pub fn evidence_date_folder(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Accepted detection, ready for `detected_plates_wh_devices`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub plate: Option<String>,
    pub confidence: f64,
    pub capture_time: Option<DateTime<Utc>>,
    pub camera_id: String,
    pub camera_brand: String,
    pub camera_location: Option<String>,
    pub image_url: Option<String>,
    pub vehicle_type: Option<String>,
    pub direction: Option<String>,
    pub violation_type: Option<String>,
    pub raw_data: Value,
    pub ocr_correction_report: String,
}

/// Rejected plate, ready for `rejected_plates_wh_cameras`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRejection {
    pub camera_brand: String,
    pub camera_id: String,
    pub raw_plate_text: Option<String>,
    pub confidence: f64,
    pub rejection_reason: String,
    pub rejection_type: String,
    pub country: Option<String>,
    pub vehicle_type: Option<String>,
    pub raw_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredDetection {
    pub id: i32,
    pub plate: Option<String>,
    pub confidence: Option<f64>,
    pub capture_time: Option<DateTime<Utc>>,
    pub camera_id: Option<String>,
    pub camera_brand: String,
    pub camera_location: Option<String>,
    pub image_url: Option<String>,
    pub vehicle_type: Option<String>,
    pub direction: Option<String>,
    pub violation_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub raw_data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: i64,
    pub events_today: i64,
    pub unique_plates: i64,
    pub events_last_hour: i64,
}
