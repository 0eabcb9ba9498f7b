//! Domain layer - Pure business logic.

// Camera payloads, detections and evidence naming
pub mod event;

// Plate normalization (format validation, OCR correction)
pub mod plate;
