//! Read and write connection pools.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Read,
    Write,
}

impl Endpoint {
    fn label(&self) -> &'static str {
        match self {
            Endpoint::Read => "read",
            Endpoint::Write => "write",
        }
    }
}

#[derive(Clone)]
pub struct PgPools {
    pub(super) write: PgPool,
    pub(super) read: PgPool,
}

impl PgPools {
    pub async fn connect(
        config: &DatabaseConfig,
        password: &str,
        worker_id: &str,
    ) -> Result<Self, sqlx::Error> {
        let write = connect_endpoint(config, password, worker_id, Endpoint::Write).await?;
        let read = connect_endpoint(config, password, worker_id, Endpoint::Read).await?;
        Ok(Self { write, read })
    }

    /// Pools that open connections on first use, so the next query reports
    /// any connection failure.
    pub fn connect_lazy(config: &DatabaseConfig, password: &str, worker_id: &str) -> Self {
        let lazy = |endpoint| {
            pool_options(config)
                .connect_lazy_with(connect_options(config, password, worker_id, endpoint))
        };
        Self {
            write: lazy(Endpoint::Write),
            read: lazy(Endpoint::Read),
        }
    }

    pub fn get(&self, endpoint: Endpoint) -> PgPool {
        match endpoint {
            Endpoint::Read => self.read.clone(),
            Endpoint::Write => self.write.clone(),
        }
    }

    pub async fn close(&self) {
        self.write.close().await;
        tracing::info!("Write connection pool closed");
        self.read.close().await;
        tracing::info!("Read connection pool closed");
    }
}

pub(super) fn connect_options(
    config: &DatabaseConfig,
    password: &str,
    worker_id: &str,
    endpoint: Endpoint,
) -> PgConnectOptions {
    let (host, port) = match endpoint {
        Endpoint::Read => (&config.read_host, config.read_port),
        Endpoint::Write => (&config.write_host, config.write_port),
    };
    let statement_timeout = config.query_timeout.as_millis().to_string();
    PgConnectOptions::new()
        .host(host)
        .port(port)
        .username(&config.user)
        .password(password)
        .database(&config.name)
        .application_name(&format!("neural_webhook_{}_{}", endpoint.label(), worker_id))
        .options([("statement_timeout", statement_timeout.as_str())])
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.connection_timeout)
}

async fn connect_endpoint(
    config: &DatabaseConfig,
    password: &str,
    worker_id: &str,
    endpoint: Endpoint,
) -> Result<PgPool, sqlx::Error> {
    let pool = pool_options(config)
        .connect_with(connect_options(config, password, worker_id, endpoint))
        .await?;
    let host = match endpoint {
        Endpoint::Read => &config.read_host,
        Endpoint::Write => &config.write_host,
    };
    tracing::info!(endpoint = endpoint.label(), host = %host, "Created connection pool");
    Ok(pool)
}
