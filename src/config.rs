/// Configuration management for the agent directory
use crate::error::{DirError, DirResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub verification: VerificationConfig,
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
    pub database: PathBuf,
}

/// Name verification and reverification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Age after which a stored verification is re-run
    pub ttl: Duration,
    /// How often the reverification scheduler scans for due records
    pub scan_interval: Duration,
    /// Fixed worker pool size
    pub worker_count: usize,
    /// Bounded work queue capacity
    pub queue_capacity: usize,
    /// Maximum records pulled per scan
    pub scan_limit: i64,
    /// Timeout applied to every DNS lookup and well-known fetch
    pub network_timeout: Duration,
    /// Fetch well-known documents over plain HTTP. Tests only.
    pub allow_insecure_well_known: bool,
    /// Run the reverification scheduler alongside the server
    pub reverification_enabled: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(86400),
            scan_interval: Duration::from_secs(3600),
            worker_count: 5,
            queue_capacity: 100,
            scan_limit: 500,
            network_timeout: Duration::from_secs(10),
            allow_insecure_well_known: false,
            reverification_enabled: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_directory = PathBuf::from("./data");
        Self {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 8888,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                database: data_directory.join("directory.sqlite"),
                data_directory,
            },
            verification: VerificationConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> DirResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("DIR_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("DIR_PORT")
            .unwrap_or_else(|_| "8888".to_string())
            .parse()
            .map_err(|_| DirError::Validation("Invalid port number".to_string()))?;
        let version = env::var("DIR_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let data_directory: PathBuf = env::var("DIR_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("DIR_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("directory.sqlite"));

        let defaults = VerificationConfig::default();
        let verification = VerificationConfig {
            ttl: env_secs("DIR_VERIFICATION_TTL", defaults.ttl)?,
            scan_interval: env_secs("DIR_VERIFICATION_SCAN_INTERVAL", defaults.scan_interval)?,
            worker_count: env_parse("DIR_VERIFICATION_WORKERS", defaults.worker_count)?,
            queue_capacity: env_parse("DIR_VERIFICATION_QUEUE_SIZE", defaults.queue_capacity)?,
            scan_limit: env_parse("DIR_VERIFICATION_SCAN_LIMIT", defaults.scan_limit)?,
            network_timeout: env_secs("DIR_VERIFICATION_TIMEOUT", defaults.network_timeout)?,
            allow_insecure_well_known: env_parse(
                "DIR_VERIFICATION_ALLOW_INSECURE",
                defaults.allow_insecure_well_known,
            )?,
            reverification_enabled: env_parse(
                "DIR_REVERIFICATION_ENABLED",
                defaults.reverification_enabled,
            )?,
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            verification,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> DirResult<()> {
        if self.service.hostname.is_empty() {
            return Err(DirError::Validation("Hostname cannot be empty".to_string()));
        }

        let v = &self.verification;
        if v.ttl.is_zero() {
            return Err(DirError::Validation(
                "Verification TTL must be greater than zero".to_string(),
            ));
        }
        if v.scan_interval.is_zero() {
            return Err(DirError::Validation(
                "Scan interval must be greater than zero".to_string(),
            ));
        }
        if v.worker_count == 0 {
            return Err(DirError::Validation(
                "At least one verification worker is required".to_string(),
            ));
        }
        if v.queue_capacity == 0 {
            return Err(DirError::Validation(
                "Verification queue capacity must be greater than zero".to_string(),
            ));
        }
        if v.scan_limit <= 0 {
            return Err(DirError::Validation(
                "Scan limit must be greater than zero".to_string(),
            ));
        }
        if v.network_timeout.is_zero() {
            return Err(DirError::Validation(
                "Network timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Read a whole number of seconds from the environment
fn env_secs(key: &str, default: Duration) -> DirResult<Duration> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

/// Parse an environment variable, falling back to `default` when unset
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> DirResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DirError::Validation(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
