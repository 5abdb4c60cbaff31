//! Runtime configuration for the keyword relay.
//!
//! Values come from three layers, later ones winning: built-in defaults,
//! an optional YAML file, then `KEYWORD_RELAY_*` environment variables.
//! CLI flags are applied on top by the command layer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::{QueueBackend, DEFAULT_QUEUE_KEY};
use crate::storage::{StoreOptions, DEFAULT_MARK_CHUNK_SIZE};

/// Configuration for every pipeline component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    // Durable store
    /// SQLite connection URL.
    pub database_url: String,
    /// Pool size; must cover the import workers plus the parent connection.
    pub db_max_connections: u32,
    /// How long a writer waits on the database lock.
    #[serde(with = "duration_secs")]
    pub db_busy_timeout: Duration,
    /// Ids per mark statement.
    pub mark_chunk_size: usize,

    // Fast queue tier
    /// Which fast-tier implementation to use.
    pub queue_backend: QueueBackend,
    /// Redis connection URL.
    pub redis_url: String,
    /// List key holding buffered keywords.
    pub queue_key: String,
    /// Bound for each fast-tier round trip.
    #[serde(with = "duration_millis")]
    pub queue_op_timeout: Duration,

    // Bulk importer
    /// Concurrent sheet workers per import.
    pub import_workers: usize,

    // Refill scheduler
    /// Rows fetched per refill batch.
    pub refill_batch_size: usize,
    /// Maximum batches per refill run.
    pub refill_batches: usize,
    /// Skip pushing keyword text already pushed in the same run.
    pub refill_dedupe: bool,
    /// Period of the in-process refill timer used by `serve`.
    #[serde(with = "duration_secs")]
    pub refill_interval: Duration,

    // Dispatch
    /// Rows claimed from the store when the fast tier is empty.
    pub dispatch_batch_size: usize,
    /// Fallback attempts when concurrent callers claim the same rows.
    pub dispatch_claim_attempts: usize,

    // HTTP
    /// Listen address for `serve`.
    pub listen_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://keywords.db".to_string(),
            db_max_connections: 8,
            db_busy_timeout: Duration::from_secs(30),
            mark_chunk_size: DEFAULT_MARK_CHUNK_SIZE,

            queue_backend: QueueBackend::Redis,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            queue_op_timeout: Duration::from_millis(500),

            import_workers: 4,

            refill_batch_size: 1000,
            refill_batches: 10,
            refill_dedupe: true,
            refill_interval: Duration::from_secs(24 * 60 * 60),

            dispatch_batch_size: 1000,
            dispatch_claim_attempts: 3,

            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl RelayConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration: defaults, then `path` if given, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        let config = base.merge_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: PathBuf::from(path),
            source: e,
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Creates configuration from defaults and environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL` / `KEYWORD_RELAY_DATABASE_URL`: SQLite URL
    /// - `KEYWORD_RELAY_DB_MAX_CONNECTIONS`: pool size (default: 8)
    /// - `KEYWORD_RELAY_DB_BUSY_TIMEOUT_SECS`: lock wait (default: 30)
    /// - `KEYWORD_RELAY_MARK_CHUNK_SIZE`: ids per mark statement (default: 500)
    /// - `KEYWORD_RELAY_QUEUE_BACKEND`: `redis` or `memory` (default: redis)
    /// - `REDIS_URL` / `KEYWORD_RELAY_REDIS_URL`: Redis URL
    /// - `KEYWORD_RELAY_QUEUE_KEY`: list key (default: keyword_list)
    /// - `KEYWORD_RELAY_QUEUE_TIMEOUT_MS`: per-operation bound (default: 500)
    /// - `KEYWORD_RELAY_IMPORT_WORKERS`: sheet workers (default: 4)
    /// - `KEYWORD_RELAY_REFILL_BATCH_SIZE`: rows per batch (default: 1000)
    /// - `KEYWORD_RELAY_REFILL_BATCHES`: batches per run (default: 10)
    /// - `KEYWORD_RELAY_REFILL_DEDUPE`: skip repeated text (default: true)
    /// - `KEYWORD_RELAY_REFILL_INTERVAL_SECS`: in-process timer (default: 86400)
    /// - `KEYWORD_RELAY_DISPATCH_BATCH_SIZE`: fallback claim size (default: 1000)
    /// - `KEYWORD_RELAY_DISPATCH_CLAIM_ATTEMPTS`: fallback retries (default: 3)
    /// - `KEYWORD_RELAY_LISTEN_ADDR`: HTTP address (default: 0.0.0.0:8080)
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().merge_env()?;
        config.validate()?;
        Ok(config)
    }

    fn merge_env(mut self) -> Result<Self, ConfigError> {
        if let Some(val) = env_any(&["KEYWORD_RELAY_DATABASE_URL", "DATABASE_URL"]) {
            self.database_url = val;
        }
        if let Ok(val) = std::env::var("KEYWORD_RELAY_DB_MAX_CONNECTIONS") {
            self.db_max_connections = parse_env_value(&val, "KEYWORD_RELAY_DB_MAX_CONNECTIONS")?;
        }
        if let Ok(val) = std::env::var("KEYWORD_RELAY_DB_BUSY_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "KEYWORD_RELAY_DB_BUSY_TIMEOUT_SECS")?;
            self.db_busy_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("KEYWORD_RELAY_MARK_CHUNK_SIZE") {
            self.mark_chunk_size = parse_env_value(&val, "KEYWORD_RELAY_MARK_CHUNK_SIZE")?;
        }

        if let Ok(val) = std::env::var("KEYWORD_RELAY_QUEUE_BACKEND") {
            self.queue_backend = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "KEYWORD_RELAY_QUEUE_BACKEND".to_string(),
                message,
            })?;
        }
        if let Some(val) = env_any(&["KEYWORD_RELAY_REDIS_URL", "REDIS_URL"]) {
            self.redis_url = val;
        }
        if let Ok(val) = std::env::var("KEYWORD_RELAY_QUEUE_KEY") {
            self.queue_key = val;
        }
        if let Ok(val) = std::env::var("KEYWORD_RELAY_QUEUE_TIMEOUT_MS") {
            let ms: u64 = parse_env_value(&val, "KEYWORD_RELAY_QUEUE_TIMEOUT_MS")?;
            self.queue_op_timeout = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("KEYWORD_RELAY_IMPORT_WORKERS") {
            self.import_workers = parse_env_value(&val, "KEYWORD_RELAY_IMPORT_WORKERS")?;
        }

        if let Ok(val) = std::env::var("KEYWORD_RELAY_REFILL_BATCH_SIZE") {
            self.refill_batch_size = parse_env_value(&val, "KEYWORD_RELAY_REFILL_BATCH_SIZE")?;
        }
        if let Ok(val) = std::env::var("KEYWORD_RELAY_REFILL_BATCHES") {
            self.refill_batches = parse_env_value(&val, "KEYWORD_RELAY_REFILL_BATCHES")?;
        }
        if let Ok(val) = std::env::var("KEYWORD_RELAY_REFILL_DEDUPE") {
            self.refill_dedupe = parse_env_bool(&val, "KEYWORD_RELAY_REFILL_DEDUPE")?;
        }
        if let Ok(val) = std::env::var("KEYWORD_RELAY_REFILL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "KEYWORD_RELAY_REFILL_INTERVAL_SECS")?;
            self.refill_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("KEYWORD_RELAY_DISPATCH_BATCH_SIZE") {
            self.dispatch_batch_size = parse_env_value(&val, "KEYWORD_RELAY_DISPATCH_BATCH_SIZE")?;
        }
        if let Ok(val) = std::env::var("KEYWORD_RELAY_DISPATCH_CLAIM_ATTEMPTS") {
            self.dispatch_claim_attempts =
                parse_env_value(&val, "KEYWORD_RELAY_DISPATCH_CLAIM_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("KEYWORD_RELAY_LISTEN_ADDR") {
            self.listen_addr = val;
        }

        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.import_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "import_workers must be greater than 0".to_string(),
            ));
        }

        // One connection per sheet worker, plus the importer's own for truncate.
        if (self.db_max_connections as usize) < self.import_workers + 1 {
            return Err(ConfigError::ValidationFailed(format!(
                "db_max_connections ({}) must be at least import_workers + 1 ({})",
                self.db_max_connections,
                self.import_workers + 1
            )));
        }

        if self.mark_chunk_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "mark_chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.queue_backend == QueueBackend::Redis && self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty with the redis backend".to_string(),
            ));
        }

        if self.queue_key.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_key cannot be empty".to_string(),
            ));
        }

        if self.queue_op_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "queue_op_timeout must be greater than 0".to_string(),
            ));
        }

        if self.refill_batch_size == 0 || self.refill_batches == 0 {
            return Err(ConfigError::ValidationFailed(
                "refill_batch_size and refill_batches must be greater than 0".to_string(),
            ));
        }

        if self.refill_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "refill_interval must be greater than 0".to_string(),
            ));
        }

        if self.dispatch_batch_size == 0 || self.dispatch_claim_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "dispatch_batch_size and dispatch_claim_attempts must be greater than 0"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Store connection options derived from this configuration.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_connections: self.db_max_connections,
            busy_timeout: self.db_busy_timeout,
            mark_chunk_size: self.mark_chunk_size,
        }
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the queue backend.
    pub fn with_queue_backend(mut self, backend: QueueBackend) -> Self {
        self.queue_backend = backend;
        self
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the import worker count.
    pub fn with_import_workers(mut self, workers: usize) -> Self {
        self.import_workers = workers;
        self
    }

    /// Builder method to set refill batch size and count.
    pub fn with_refill(mut self, batch_size: usize, batches: usize) -> Self {
        self.refill_batch_size = batch_size;
        self.refill_batches = batches;
        self
    }

    /// Builder method to set the listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }
}

fn env_any(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| std::env::var(k).ok())
}

/// Parses an environment variable value into the specified type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parses a boolean environment variable.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", value),
        }),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.refill_batch_size, 1000);
        assert_eq!(config.refill_batches, 10);
        assert_eq!(config.import_workers, 4);
        assert_eq!(config.queue_key, "keyword_list");
    }

    #[test]
    fn test_validation_rejects_small_pool() {
        let config = RelayConfig {
            db_max_connections: 4,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("import_workers + 1"));
    }

    #[test]
    fn test_validation_rejects_zero_refill() {
        let config = RelayConfig::default().with_refill(0, 10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database_url: sqlite:///tmp/kw.db\nqueue_backend: memory\n\
             queue_op_timeout: 250\nrefill_interval: 3600"
        )
        .unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database_url, "sqlite:///tmp/kw.db");
        assert_eq!(config.queue_backend, QueueBackend::Memory);
        assert_eq!(config.queue_op_timeout, Duration::from_millis(250));
        assert_eq!(config.refill_interval, Duration::from_secs(3600));
        assert_eq!(config.refill_batch_size, 1000);
    }

    #[test]
    fn test_from_file_missing() {
        let err = RelayConfig::from_file(Path::new("/nonexistent/relay.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_parse_env_helpers() {
        assert_eq!(parse_env_value::<usize>(" 12 ", "K").unwrap(), 12);
        assert!(parse_env_value::<usize>("x", "K").is_err());
        assert!(parse_env_bool("on", "K").unwrap());
        assert!(!parse_env_bool("0", "K").unwrap());
        assert!(parse_env_bool("maybe", "K").is_err());
    }

    #[test]
    fn test_builders_and_store_options() {
        let config = RelayConfig::new()
            .with_database_url("sqlite://other.db")
            .with_queue_backend(QueueBackend::Memory)
            .with_import_workers(2)
            .with_listen_addr("127.0.0.1:9000");

        assert_eq!(config.database_url, "sqlite://other.db");
        assert_eq!(config.import_workers, 2);
        assert_eq!(config.listen_addr, "127.0.0.1:9000");

        let opts = config.store_options();
        assert_eq!(opts.max_connections, 8);
        assert_eq!(opts.mark_chunk_size, 500);
    }
}
