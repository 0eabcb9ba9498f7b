//! Application layer - Services built on the ports.

pub mod health;
pub mod janitor;
pub mod processor;
pub mod secrets;

pub use health::{HealthRegistry, ServiceStatus};
pub use processor::EventProcessor;
pub use secrets::{SecretProvider, VaultPasswordRefresher};
