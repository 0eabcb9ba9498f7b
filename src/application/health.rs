//! Service health as reported by `/health`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Healthy,
    Unhealthy,
    Stopped,
}

#[derive(Debug, Clone)]
struct HealthState {
    status: ServiceStatus,
    services: BTreeMap<String, String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: ServiceStatus,
    pub services: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub worker_id: String,
    pub node_name: String,
    pub timestamp: DateTime<Utc>,
}

pub struct HealthRegistry {
    worker_id: String,
    node_name: String,
    state: RwLock<HealthState>,
}

impl HealthRegistry {
    pub fn new(worker_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            node_name: node_name.into(),
            state: RwLock::new(HealthState {
                status: ServiceStatus::Starting,
                services: BTreeMap::new(),
                error: None,
            }),
        }
    }

    fn update(&self, f: impl FnOnce(&mut HealthState)) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut state);
    }

    pub fn set_status(&self, status: ServiceStatus) {
        self.update(|state| state.status = status);
    }

    /// Record the status of one dependency (database, storage, vault...).
    pub fn set_service(&self, name: &str, status: impl Into<String>) {
        let status = status.into();
        self.update(|state| {
            state.services.insert(name.to_string(), status);
        });
    }

    /// Mark the service unhealthy with the error that caused it.
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(|state| {
            state.status = ServiceStatus::Unhealthy;
            state.error = Some(error);
        });
    }

    pub fn status(&self) -> ServiceStatus {
        self.state.read().unwrap_or_else(|e| e.into_inner()).status
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == ServiceStatus::Healthy
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        HealthSnapshot {
            status: state.status,
            services: state.services,
            error: state.error,
            worker_id: self.worker_id.clone(),
            node_name: self.node_name.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unready_and_tracks_services() {
        let health = HealthRegistry::new("pod-1", "node-a");
        assert_eq!(health.status(), ServiceStatus::Starting);
        assert!(!health.is_healthy());

        health.set_service("database", "healthy");
        health.set_service("storage", "local");
        health.set_status(ServiceStatus::Healthy);

        let snapshot = health.snapshot();
        assert!(health.is_healthy());
        assert_eq!(snapshot.services.len(), 2);
        assert_eq!(snapshot.worker_id, "pod-1");
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap()["status"],
            serde_json::json!("healthy")
        );
    }

    #[test]
    fn failure_records_error() {
        let health = HealthRegistry::new("pod-1", "node-a");
        health.set_status(ServiceStatus::Healthy);
        health.fail("database unreachable");

        let snapshot = health.snapshot();
        assert_eq!(snapshot.status, ServiceStatus::Unhealthy);
        assert_eq!(snapshot.error.as_deref(), Some("database unreachable"));
    }
}
