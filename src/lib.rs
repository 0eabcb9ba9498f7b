//! Neural Webhook - ANPR camera webhook service
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (plate normalization, camera payloads)
//! - ports/: Trait definitions (evidence storage, event repository, secrets)
//! - adapters/: Concrete implementations (local fs, OCI Object Storage, PostgreSQL, vault)
//! - application/: Services built on the ports (event processing, health, cleanup)
//! - http: Inbound axum adapter
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod http;
pub mod logging;
pub mod ports;

pub use application::{EventProcessor, HealthRegistry};
pub use config::WebhookConfig;
