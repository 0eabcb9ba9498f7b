//! PostgreSQL adapter.
//!
//! Detections go to `detected_plates_wh_devices` and rejections to
//! `rejected_plates_wh_cameras`. Both tables are shared with the webhook
//! services of other camera brands, so every statement is idempotent.

mod pool;
mod repository;

pub use pool::{Endpoint, PgPools};
pub use repository::PgEventRepository;

/// SQLSTATE invalid_password.
const INVALID_PASSWORD: &str = "28P01";
/// SQLSTATE invalid_authorization_specification.
const INVALID_AUTHORIZATION: &str = "28000";

const SCHEMA: [&str; 11] = [
    "CREATE TABLE IF NOT EXISTS detected_plates_wh_devices (
        id SERIAL PRIMARY KEY,
        plate VARCHAR(20),
        image_url VARCHAR(500),
        camera_brand VARCHAR(20) NOT NULL,
        camera_id VARCHAR(100),
        camera_location VARCHAR(200),
        violation_type VARCHAR(100),
        vehicle_type VARCHAR(50),
        direction VARCHAR(20),
        confidence DECIMAL(6,4),
        capture_time TIMESTAMP WITH TIME ZONE,
        created_at TIMESTAMP WITH TIME ZONE DEFAULT (NOW() AT TIME ZONE 'UTC'),
        raw_data JSONB,
        ocr_correction_report TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_wh_devices_plate ON detected_plates_wh_devices(plate)",
    "CREATE INDEX IF NOT EXISTS idx_wh_devices_camera_id ON detected_plates_wh_devices(camera_id)",
    "CREATE INDEX IF NOT EXISTS idx_wh_devices_created_at ON detected_plates_wh_devices(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_wh_devices_camera_brand ON detected_plates_wh_devices(camera_brand)",
    "CREATE INDEX IF NOT EXISTS idx_wh_devices_capture_time ON detected_plates_wh_devices(capture_time)",
    "CREATE TABLE IF NOT EXISTS rejected_plates_wh_cameras (
        id SERIAL PRIMARY KEY,
        camera_brand VARCHAR(20) NOT NULL,
        camera_id VARCHAR(100),
        raw_plate_text VARCHAR(50),
        confidence DECIMAL(5,2),
        rejection_reason TEXT NOT NULL,
        rejection_type VARCHAR(50),
        country VARCHAR(10),
        vehicle_type VARCHAR(50),
        raw_data TEXT,
        created_at TIMESTAMP WITH TIME ZONE DEFAULT (NOW() AT TIME ZONE 'UTC')
    )",
    "CREATE INDEX IF NOT EXISTS idx_rejected_wh_brand_camera
        ON rejected_plates_wh_cameras(camera_brand, camera_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_rejected_wh_type ON rejected_plates_wh_cameras(rejection_type)",
    "CREATE INDEX IF NOT EXISTS idx_rejected_wh_confidence ON rejected_plates_wh_cameras(confidence)",
    "CREATE INDEX IF NOT EXISTS idx_rejected_wh_created_at ON rejected_plates_wh_cameras(created_at)",
];

/// True when the server refused the credentials.
pub fn is_auth_error(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        if matches!(
            db.code().as_deref(),
            Some(INVALID_PASSWORD) | Some(INVALID_AUTHORIZATION)
        ) {
            return true;
        }
    }
    err.to_string()
        .to_lowercase()
        .contains("authentication failed")
}
