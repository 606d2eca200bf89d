/// Configuration management for the DID registrar
use crate::error::{RegistrarError, RegistrarResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main registrar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub publication: PublicationConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub journal_db: PathBuf,
}

/// Publication retry and retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub confirmation_timeout_secs: u64,
    /// How long finished scheduled operations stay queryable
    pub operation_retention_secs: u64,
    /// Upper bound for long-poll waits
    pub max_wait_secs: u64,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            confirmation_timeout_secs: 300,
            operation_retention_secs: 86_400,
            max_wait_secs: 60,
        }
    }
}

/// In-memory ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub confirmation_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> RegistrarResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| RegistrarError::Validation(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

impl RegistrarConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> RegistrarResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("REGISTRAR_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("REGISTRAR_PORT")
            .unwrap_or_else(|_| "8085".to_string())
            .parse()
            .map_err(|_| RegistrarError::Validation("Invalid port number".to_string()))?;
        let version = env::var("REGISTRAR_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let data_directory: PathBuf = env::var("REGISTRAR_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let journal_db = env::var("REGISTRAR_JOURNAL_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("operations.sqlite"));

        let defaults = PublicationConfig::default();
        let publication = PublicationConfig {
            max_attempts: parse_or("REGISTRAR_PUBLISH_MAX_ATTEMPTS", defaults.max_attempts)?,
            initial_backoff_ms: parse_or(
                "REGISTRAR_PUBLISH_INITIAL_BACKOFF_MS",
                defaults.initial_backoff_ms,
            )?,
            max_backoff_ms: parse_or("REGISTRAR_PUBLISH_MAX_BACKOFF_MS", defaults.max_backoff_ms)?,
            backoff_multiplier: parse_or(
                "REGISTRAR_PUBLISH_BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
            )?,
            confirmation_timeout_secs: parse_or(
                "REGISTRAR_CONFIRMATION_TIMEOUT_SECS",
                defaults.confirmation_timeout_secs,
            )?,
            operation_retention_secs: parse_or(
                "REGISTRAR_OPERATION_RETENTION_SECS",
                defaults.operation_retention_secs,
            )?,
            max_wait_secs: parse_or("REGISTRAR_MAX_WAIT_SECS", defaults.max_wait_secs)?,
        };

        let confirmation_delay_ms = parse_or("REGISTRAR_LEDGER_CONFIRMATION_DELAY_MS", 1000u64)?;

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("REGISTRAR_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(RegistrarConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                journal_db,
            },
            publication,
            ledger: LedgerConfig {
                confirmation_delay_ms,
            },
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> RegistrarResult<()> {
        if self.service.hostname.is_empty() {
            return Err(RegistrarError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.service.port == 0 {
            return Err(RegistrarError::Validation("Port cannot be zero".to_string()));
        }

        let publication = &self.publication;
        if publication.max_attempts == 0 {
            return Err(RegistrarError::Validation(
                "Publication needs at least one attempt".to_string(),
            ));
        }
        if publication.initial_backoff_ms > publication.max_backoff_ms {
            return Err(RegistrarError::Validation(
                "Initial backoff cannot exceed max backoff".to_string(),
            ));
        }
        if !(publication.backoff_multiplier >= 1.0) {
            return Err(RegistrarError::Validation(
                "Backoff multiplier must be at least 1.0".to_string(),
            ));
        }
        if publication.confirmation_timeout_secs == 0 {
            return Err(RegistrarError::Validation(
                "Confirmation timeout cannot be zero".to_string(),
            ));
        }

        Ok(())
    }
}
