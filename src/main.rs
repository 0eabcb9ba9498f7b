//! Neural webhook server.
//!
//! Wires up:
//! - PostgreSQL repository (password from the vault when enabled)
//! - Evidence storage (local folder or OCI Object Storage)
//! - Event processor and the HTTP API
//! - Daily cleanup of the scratch directory

use neural_webhook::adapters::local::LocalEvidenceStore;
use neural_webhook::adapters::oci::OciObjectStore;
use neural_webhook::adapters::postgres::PgEventRepository;
use neural_webhook::adapters::vault::MountedSecretSource;
use neural_webhook::application::{
    janitor, EventProcessor, HealthRegistry, SecretProvider, ServiceStatus, VaultPasswordRefresher,
};
use neural_webhook::config::WebhookConfig;
use neural_webhook::http::{self, AppState};
use neural_webhook::logging;
use neural_webhook::ports::repository::EventRepository;
use neural_webhook::ports::storage::{EvidenceStore, StorageKind};
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match WebhookConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let log_dir = (!config.is_kubernetes()).then(|| Path::new(logging::LOG_DIR));
    if let Err(e) = logging::init(&config.log_level, log_dir) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Neural webhook stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: WebhookConfig) -> Result<(), BoxError> {
    tracing::info!(
        version = http::VERSION,
        worker_id = %config.worker_id,
        environment = if config.is_kubernetes() { "kubernetes" } else { "local" },
        storage = config.storage_type(),
        "Starting Neural webhook"
    );
    if config.storage_kind == StorageKind::OracleCloud {
        tracing::info!(
            bucket = %config.oracle.bucket,
            region = %config.oracle.region,
            "Oracle Cloud Object Storage"
        );
    }

    let health = Arc::new(HealthRegistry::new(&config.worker_id, &config.node_name));
    let config = Arc::new(config);

    let processor = match initialize(&config, &health).await {
        Ok(processor) => processor,
        Err(e) => {
            health.fail(e.to_string());
            return Err(e);
        }
    };

    let shutdown = CancellationToken::new();
    let janitor = config
        .cleanup
        .clone()
        .map(|cleanup| janitor::spawn(cleanup, shutdown.clone()));

    let state = AppState {
        config: config.clone(),
        processor: processor.clone(),
        health: health.clone(),
    };
    let app = http::router(state);

    let addr = format!("{}:{}", config.addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Listening");
    health.set_status(ServiceStatus::Healthy);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    shutdown.cancel();
    if let Some(handle) = janitor {
        let _ = handle.await;
    }
    processor.repository().close().await;
    health.set_service("database", "stopped");
    health.set_status(ServiceStatus::Stopped);
    tracing::info!("Services closed");

    served.map_err(Into::into)
}

async fn initialize(
    config: &WebhookConfig,
    health: &HealthRegistry,
) -> Result<Arc<EventProcessor>, BoxError> {
    let mut refresher = None;
    let password = match &config.vault {
        Some(vault) => {
            tracing::info!(vault_id = %vault.vault_id, "Fetching DB password from OCI Vault");
            let provider = Arc::new(SecretProvider::new(
                MountedSecretSource::new(&vault.secrets_dir),
                vault.cache_ttl,
            ));
            let password = provider.get_secret(&vault.db_password_secret, false).await?;
            refresher = Some(Arc::new(VaultPasswordRefresher::new(
                provider,
                &vault.db_password_secret,
            )));
            password
        }
        None => config
            .database
            .password
            .clone()
            .ok_or("DB_PASSWORD is not set")?,
    };

    tracing::info!("Initialising database");
    let repository =
        PgEventRepository::connect(config.database.clone(), &password, &config.worker_id).await?;
    if let Some(refresher) = refresher {
        repository.set_credential_refresher(refresher);
    }
    health.set_service("database", "healthy");

    let storage: Arc<dyn EvidenceStore> = match config.storage_kind {
        StorageKind::Local => Arc::new(LocalEvidenceStore::new(&config.evidence_folder).await?),
        StorageKind::OracleCloud => {
            Arc::new(OciObjectStore::connect(&config.oracle, &config.worker_id).await)
        }
    };
    let repository: Arc<dyn EventRepository> = Arc::new(repository);
    let processor = Arc::new(EventProcessor::new(
        storage.clone(),
        repository,
        config.plate_rules.clone(),
    ));
    health.set_service("event_processor", "healthy");

    let storage_health = storage.health_check().await;
    if storage_health.is_healthy() {
        tracing::info!(storage = %storage_health.storage_type, "Storage healthy");
        health.set_service("storage", "healthy");
    } else {
        tracing::warn!(error = ?storage_health.error, "Storage unhealthy");
        health.set_service("storage", "unhealthy");
    }

    Ok(processor)
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => {},
    }
    tracing::info!("Shutdown signal received");
}
