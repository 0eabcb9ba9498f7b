//! HTTP inbound adapter.

mod error;
mod handlers;

pub use error::ApiError;

use crate::application::{EventProcessor, HealthRegistry};
use crate::config::WebhookConfig;
use crate::domain::event::EVIDENCE_PREFIX;
use crate::ports::storage::StorageKind;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub const SERVICE_NAME: &str = "Neural Camera Webhook";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WebhookConfig>,
    pub processor: Arc<EventProcessor>,
    pub health: Arc<HealthRegistry>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/metrics", get(handlers::metrics))
        .route("/events", post(handlers::receive_event))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/eventos/recientes", get(handlers::recent_events))
        .route("/eventos/placa/:plate", get(handlers::events_by_plate))
        .route("/estadisticas", get(handlers::statistics))
        .route("/imagen/*image_path", get(handlers::image_url))
        .route("/configuracion", get(handlers::configuration))
        .route("/storage/test", get(handlers::storage_test));

    if state.processor.storage().kind() == StorageKind::Local {
        router = router.nest_service(
            &format!("/{}", EVIDENCE_PREFIX),
            ServeDir::new(&state.config.evidence_folder),
        );
    }

    router
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
