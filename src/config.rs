//! Configuration loaded from the environment.

use crate::domain::plate::PlateRules;
use crate::ports::storage::StorageKind;
use chrono::NaiveTime;
use serde::Serialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const KUBERNETES_SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const MAX_POOL_CONNECTIONS: u32 = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// PostgreSQL endpoints and pool sizing.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub name: String,
    pub user: String,
    /// `None` until fetched from the vault when the vault is enabled.
    pub password: Option<String>,
    pub write_host: String,
    pub write_port: u16,
    pub read_host: String,
    pub read_port: u16,
    pub min_connections: u32,
    pub max_connections: u32,
    pub query_timeout: Duration,
    pub connection_timeout: Duration,
}

/// OCI Vault access for the database password.
#[derive(Clone, Debug)]
pub struct VaultConfig {
    pub vault_id: String,
    pub db_password_secret: String,
    pub cache_ttl: Duration,
    /// Directory where the secrets store driver mounts vault secrets.
    pub secrets_dir: PathBuf,
}

/// Oracle Cloud Object Storage bucket, reached through its S3-compatible API.
#[derive(Clone, Debug)]
pub struct OracleConfig {
    pub namespace: String,
    pub bucket: String,
    pub region: String,
    pub auth_type: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl OracleConfig {
    pub fn s3_compat_endpoint(&self) -> String {
        format!(
            "https://{}.compat.objectstorage.{}.oraclecloud.com",
            self.namespace, self.region
        )
    }
}

/// Daily purge of a scratch directory.
#[derive(Clone, Debug)]
pub struct CleanupConfig {
    pub dir: PathBuf,
    pub at: NaiveTime,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub database: DatabaseConfig,
    pub vault: Option<VaultConfig>,
    pub storage_kind: StorageKind,
    pub oracle: OracleConfig,
    pub evidence_folder: PathBuf,
    pub plate_rules: PlateRules,
    pub worker_id: String,
    pub node_name: String,
    pub log_level: String,
    pub addr: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub cleanup: Option<CleanupConfig>,
}

#[derive(Debug, Serialize)]
pub struct PoolInfo {
    pub min_connections: u32,
    pub max_connections: u32,
    pub query_timeout: u64,
    pub connection_timeout: u64,
}

#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    pub write_endpoint: String,
    pub read_endpoint: String,
    pub database: String,
    pub pool_config: PoolInfo,
}

#[derive(Debug, Serialize)]
pub struct StorageInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub evidence_folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
}

/// Reads typed values through a key lookup so tests can skip the process environment.
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Empty when unset, with the problem pushed onto `errors`.
    fn required(&self, key: &str, errors: &mut Vec<String>) -> String {
        self.get(key).unwrap_or_else(|| {
            errors.push(format!("Missing required environment variable: {}", key));
            String::new()
        })
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: format!("'{}': {}", raw, e),
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    }
}

impl WebhookConfig {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let vault = match (vars.get("VAULT_ID"), vars.get("SECRET_DB_PASSWORD")) {
            (Some(vault_id), Some(db_password_secret)) => Some(VaultConfig {
                vault_id,
                db_password_secret,
                cache_ttl: Duration::from_secs(vars.parse("VAULT_CACHE_TTL_SEC", 86_400)?),
                secrets_dir: PathBuf::from(vars.or("VAULT_SECRETS_DIR", "/mnt/secrets-store")),
            }),
            _ => None,
        };

        let mut errors = Vec::new();
        let password = match vault {
            Some(_) => None,
            None => Some(vars.required("DB_PASSWORD", &mut errors)),
        };

        let write_host = vars.required("DB_WRITE_HOST", &mut errors);
        let write_port = vars.parse("DB_WRITE_PORT", 5432)?;
        let database = DatabaseConfig {
            name: vars.required("DB_NAME", &mut errors),
            user: vars.required("DB_USER", &mut errors),
            password,
            read_host: vars.get("DB_READ_HOST").unwrap_or_else(|| write_host.clone()),
            read_port: vars.parse("DB_READ_PORT", write_port)?,
            write_host,
            write_port,
            min_connections: vars.parse("DB_MIN_CONNECTIONS", 5)?,
            max_connections: vars.parse("DB_MAX_CONNECTIONS", 15)?,
            query_timeout: Duration::from_secs(vars.parse("DB_QUERY_TIMEOUT", 10)?),
            connection_timeout: Duration::from_secs(vars.parse("CONNECTION_TIMEOUT", 3)?),
        };

        let storage_type = vars.or("STORAGE_TYPE", "local");
        let oracle = OracleConfig {
            namespace: vars.or("ORACLE_NAMESPACE", ""),
            bucket: vars.or("ORACLE_BUCKET_NAME", "webhook_cameras_prod"),
            region: vars.or("ORACLE_REGION", "us-ashburn-1"),
            auth_type: vars.or("ORACLE_AUTH_TYPE", "customer_secret_key"),
            access_key_id: vars.get("ORACLE_ACCESS_KEY_ID"),
            secret_access_key: vars.get("ORACLE_SECRET_ACCESS_KEY"),
        };

        let plate_rules = PlateRules {
            min_confidence: vars.parse("MIN_CONFIDENCE_NEURAL", 85.0)?,
            reject_foreign_plates: vars.flag("REJECT_FOREIGN_PLATES", true),
            max_ocr_corrections: vars.parse("MAX_OCR_CORRECTIONS_NEURAL", 1)?,
            strict_mode: vars.flag("STRICT_MODE", false),
        };

        let cleanup = match vars.get("CLEANUP_DIR") {
            Some(dir) => {
                let raw = vars.or("CLEANUP_AT", "18:06");
                let at = NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|e| {
                    ConfigError::Invalid {
                        key: "CLEANUP_AT",
                        message: format!("'{}': {}", raw, e),
                    }
                })?;
                Some(CleanupConfig {
                    dir: PathBuf::from(dir),
                    at,
                })
            }
            None => None,
        };

        if let Some(cleanup) = &cleanup {
            if cleanup.dir.parent().is_none() {
                errors.push(format!(
                    "CLEANUP_DIR must not be a filesystem root, got '{}'",
                    cleanup.dir.display()
                ));
            }
        }
        let storage_kind = match storage_type.as_str() {
            "local" => StorageKind::Local,
            "oracle_cloud" => StorageKind::OracleCloud,
            other => {
                errors.push(format!(
                    "STORAGE_TYPE must be 'local' or 'oracle_cloud', got '{}'",
                    other
                ));
                StorageKind::Local
            }
        };
        if storage_kind == StorageKind::OracleCloud
            && (oracle.namespace.is_empty() || oracle.bucket.is_empty())
        {
            errors.push("Oracle Cloud Object Storage configuration is incomplete".to_string());
        }
        let (min, max) = (database.min_connections, database.max_connections);
        if !(1 <= min && min <= max && max <= MAX_POOL_CONNECTIONS) {
            errors.push(format!(
                "Invalid connection pool bounds (min {}, max {}, limit {})",
                min, max, MAX_POOL_CONNECTIONS
            ));
        }
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        Ok(Self {
            database,
            vault,
            storage_kind,
            oracle,
            evidence_folder: PathBuf::from(vars.or("EVIDENCE_FOLDER", "evidencias_neural")),
            plate_rules,
            worker_id: vars
                .get("HOSTNAME")
                .unwrap_or_else(|| format!("neural-webhook-{}", std::process::id())),
            node_name: vars.or("NODE_NAME", "unknown"),
            log_level: vars.or("LOG_LEVEL", "INFO").to_uppercase(),
            addr: vars.or("BIND_ADDR", "0.0.0.0"),
            port: vars.parse("PORT", 8000)?,
            max_body_bytes: vars.parse("MAX_EVENT_BODY_BYTES", 32 * 1024 * 1024)?,
            cleanup,
        })
    }

    pub fn vault_enabled(&self) -> bool {
        self.vault.is_some()
    }

    pub fn storage_type(&self) -> &'static str {
        self.storage_kind.as_str()
    }

    /// Bucket shown by informational endpoints.
    pub fn bucket_label(&self) -> &str {
        &self.oracle.bucket
    }

    pub fn database_info(&self) -> DatabaseInfo {
        let db = &self.database;
        DatabaseInfo {
            write_endpoint: format!("{}:{}", db.write_host, db.write_port),
            read_endpoint: format!("{}:{}", db.read_host, db.read_port),
            database: db.name.clone(),
            pool_config: PoolInfo {
                min_connections: db.min_connections,
                max_connections: db.max_connections,
                query_timeout: db.query_timeout.as_secs(),
                connection_timeout: db.connection_timeout.as_secs(),
            },
        }
    }

    pub fn storage_info(&self) -> StorageInfo {
        let mut info = StorageInfo {
            kind: self.storage_type(),
            evidence_folder: self.evidence_folder.display().to_string(),
            namespace: None,
            bucket: None,
            region: None,
            auth_type: None,
        };
        if self.storage_kind == StorageKind::OracleCloud {
            info.namespace = Some(self.oracle.namespace.clone());
            info.bucket = Some(self.oracle.bucket.clone());
            info.region = Some(self.oracle.region.clone());
            info.auth_type = Some(self.oracle.auth_type.clone());
        }
        info
    }

    pub fn is_kubernetes(&self) -> bool {
        Path::new(KUBERNETES_SERVICE_ACCOUNT_DIR).exists()
            || env::var_os("KUBERNETES_SERVICE_HOST").is_some()
    }
}
