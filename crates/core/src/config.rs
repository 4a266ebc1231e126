//! Process configuration from `LOS_`-prefixed environment variables
//!
//! An optional `.env` file can be loaded first; values from the file land in
//! the process environment and are read back the same way. Only the database
//! URL is required. Leaving `LOS_NATS_URL` unset selects the log-sink
//! publisher instead of the bus, which is the intended mode for local
//! development.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::relay::RelayConfig;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {var}")]
    MissingRequired { var: String },

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("failed to load env file {path}: {source}")]
    EnvFileLoad {
        path: PathBuf,
        #[source]
        source: dotenv::Error,
    },
}

// ============================================================================
// Configuration DTOs
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub database: DatabaseConfig,
    /// `None` selects the log-sink publisher
    pub nats: Option<NatsConfig>,
    pub relay: RelayTuning,
    pub consumer: ConsumerTuning,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// One or more server URLs (comma-separated in the environment)
    pub urls: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RelayTuning {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ConsumerTuning {
    pub durable_name: String,
    pub ack_wait_secs: u64,
    pub max_deliver: i64,
}

// ============================================================================
// Loading
// ============================================================================

impl WorkflowConfig {
    /// Load configuration, reading `env_file` into the process environment
    /// first when given.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        if let Some(path) = env_file {
            if !path.exists() {
                return Err(ConfigError::EnvFileLoad {
                    path: path.to_path_buf(),
                    source: dotenv::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("file not found: {}", path.display()),
                    )),
                });
            }
            dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Self::from_env()
    }

    /// Build configuration from environment variables.
    ///
    /// Required: `LOS_DATABASE_URL`. Everything else has a default.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            nats: NatsConfig::from_env()?,
            relay: RelayTuning::from_env()?,
            consumer: ConsumerTuning::from_env()?,
        })
    }
}

impl DatabaseConfig {
    /// # Required Variables
    ///
    /// - `LOS_DATABASE_URL`: PostgreSQL connection string
    ///
    /// # Optional Variables
    ///
    /// - `LOS_DB_POOL_SIZE`: default 10
    /// - `LOS_DB_CONNECT_TIMEOUT_SECS`: default 30
    pub fn from_env() -> Result<Self> {
        let url = env::var("LOS_DATABASE_URL").map_err(|_| ConfigError::MissingRequired {
            var: "LOS_DATABASE_URL".to_string(),
        })?;

        Ok(Self {
            url,
            pool_size: parse_optional_var("LOS_DB_POOL_SIZE", 10)?,
            connect_timeout_secs: parse_optional_var("LOS_DB_CONNECT_TIMEOUT_SECS", 30)?,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl NatsConfig {
    /// # Optional Variables
    ///
    /// - `LOS_NATS_URL`: NATS URL(s), comma-separated; unset means no bus
    /// - `LOS_NATS_TIMEOUT_SECS`: default 10
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(urls_raw) = env::var("LOS_NATS_URL") else {
            return Ok(None);
        };

        let urls: Vec<String> = urls_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "LOS_NATS_URL".to_string(),
                value: urls_raw,
            });
        }

        Ok(Some(Self {
            urls,
            timeout_secs: parse_optional_var("LOS_NATS_TIMEOUT_SECS", 10)?,
        }))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RelayTuning {
    /// # Optional Variables
    ///
    /// - `LOS_OUTBOX_BATCH_SIZE`: rows claimed per tick, default 50
    /// - `LOS_OUTBOX_POLL_INTERVAL_MS`: default 1000
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            batch_size: parse_optional_var("LOS_OUTBOX_BATCH_SIZE", 50)?,
            poll_interval_ms: parse_optional_var("LOS_OUTBOX_POLL_INTERVAL_MS", 1000)?,
        })
    }

    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl ConsumerTuning {
    /// # Optional Variables
    ///
    /// - `LOS_CONSUMER_DURABLE`: durable consumer name, default `los-orchestrator`
    /// - `LOS_CONSUMER_ACK_WAIT_SECS`: default 30
    /// - `LOS_CONSUMER_MAX_DELIVER`: default 5
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            durable_name: env::var("LOS_CONSUMER_DURABLE")
                .unwrap_or_else(|_| "los-orchestrator".to_string()),
            ack_wait_secs: parse_optional_var("LOS_CONSUMER_ACK_WAIT_SECS", 30)?,
            max_deliver: parse_optional_var("LOS_CONSUMER_MAX_DELIVER", 5)?,
        })
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse an optional environment variable, defaulting when unset and
/// rejecting values that are set but unparseable.
fn parse_optional_var<T>(var: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match env::var(var) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns the variables it touches so parallel runs stay isolated.

    #[test]
    fn test_parse_optional_var() {
        unsafe { env::set_var("LOS_TEST_PARSE_VAR", "42") };
        let parsed: Result<u32> = parse_optional_var("LOS_TEST_PARSE_VAR", 7);
        assert_eq!(parsed.unwrap(), 42);

        unsafe { env::remove_var("LOS_TEST_PARSE_VAR") };
        let parsed: Result<u32> = parse_optional_var("LOS_TEST_PARSE_VAR", 7);
        assert_eq!(parsed.unwrap(), 7);

        unsafe { env::set_var("LOS_TEST_PARSE_VAR", "not-a-number") };
        let parsed: Result<u32> = parse_optional_var("LOS_TEST_PARSE_VAR", 7);
        assert!(matches!(
            parsed,
            Err(ConfigError::InvalidValue { ref var, .. }) if var == "LOS_TEST_PARSE_VAR"
        ));
        unsafe { env::remove_var("LOS_TEST_PARSE_VAR") };
    }

    #[test]
    fn test_database_config_requires_url() {
        unsafe { env::remove_var("LOS_DATABASE_URL") };
        let result = DatabaseConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::MissingRequired { ref var }) if var == "LOS_DATABASE_URL"
        ));

        unsafe { env::set_var("LOS_DATABASE_URL", "postgresql://localhost/los") };
        let config = DatabaseConfig::from_env().unwrap();
        assert_eq!(config.url, "postgresql://localhost/los");
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        unsafe { env::remove_var("LOS_DATABASE_URL") };
    }

    #[test]
    fn test_nats_config_absent_means_log_sink() {
        unsafe { env::remove_var("LOS_NATS_URL") };
        assert!(NatsConfig::from_env().unwrap().is_none());

        unsafe { env::set_var("LOS_NATS_URL", "nats://n1:4222, nats://n2:4222") };
        let config = NatsConfig::from_env().unwrap().unwrap();
        assert_eq!(config.urls, vec!["nats://n1:4222", "nats://n2:4222"]);
        assert_eq!(config.timeout(), Duration::from_secs(10));

        unsafe { env::set_var("LOS_NATS_URL", " , ") };
        assert!(NatsConfig::from_env().is_err());
        unsafe { env::remove_var("LOS_NATS_URL") };
    }

    #[test]
    fn test_relay_tuning_maps_to_relay_config() {
        unsafe {
            env::set_var("LOS_OUTBOX_BATCH_SIZE", "25");
            env::set_var("LOS_OUTBOX_POLL_INTERVAL_MS", "250");
        }
        let tuning = RelayTuning::from_env().unwrap();
        let relay = tuning.to_relay_config();
        assert_eq!(relay.batch_size, 25);
        assert_eq!(relay.poll_interval, Duration::from_millis(250));
        unsafe {
            env::remove_var("LOS_OUTBOX_BATCH_SIZE");
            env::remove_var("LOS_OUTBOX_POLL_INTERVAL_MS");
        }
    }

    #[test]
    fn test_consumer_tuning_defaults() {
        unsafe {
            env::remove_var("LOS_CONSUMER_DURABLE");
            env::remove_var("LOS_CONSUMER_ACK_WAIT_SECS");
            env::remove_var("LOS_CONSUMER_MAX_DELIVER");
        }
        let tuning = ConsumerTuning::from_env().unwrap();
        assert_eq!(tuning.durable_name, "los-orchestrator");
        assert_eq!(tuning.ack_wait(), Duration::from_secs(30));
        assert_eq!(tuning.max_deliver, 5);
    }
}
