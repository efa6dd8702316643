use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

use crate::enhancement::EnhancementConfig;
use crate::error::Result;
use crate::hashing::HashingConfig;
use crate::processing::ProcessingConfig;
use crate::state::StoreConfig;

/// Environment variable naming an optional override file
pub const CONFIG_PATH_ENV: &str = "FEED_CORE_CONFIG";

/// Prefix for per-key environment overrides, e.g. `FEED_CORE__PROCESSING__WORKER_COUNT`
pub const ENV_PREFIX: &str = "FEED_CORE";

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Cache maintenance
    #[validate(nested)]
    #[serde(default)]
    pub cache: CacheConfig,

    /// Processed-incident store
    #[serde(default)]
    pub store: StoreConfig,

    /// Content hashing
    #[serde(default)]
    pub hashing: HashingConfig,

    /// Batch ingestion
    #[validate(nested)]
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Background enhancement
    #[validate(nested)]
    #[serde(default)]
    pub enhancement: EnhancementConfig,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from embedded defaults, the optional file at
    /// `$FEED_CORE_CONFIG` and `FEED_CORE__*` environment variables
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));

        // Override with config file if one is named
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        let config: Config = builder
            // Override with environment variables (prefix: FEED_CORE__)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load embedded defaults overridden by one explicit file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from(path.as_ref()).required(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CacheConfig {
    /// Name of the shared cache instance (used in logs)
    #[serde(default = "default_cache_name")]
    pub name: String,

    /// Interval between stale-entry sweeps (seconds)
    #[validate(range(min = 1))]
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Interval between processed-incident expiry sweeps (seconds)
    #[validate(range(min = 1))]
    #[serde(default = "default_store_expiry_interval")]
    pub store_expiry_interval_secs: u64,
}

impl CacheConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn store_expiry_interval(&self) -> Duration {
        Duration::from_secs(self.store_expiry_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: default_cache_name(),
            cleanup_interval_secs: default_cleanup_interval(),
            store_expiry_interval_secs: default_store_expiry_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_cache_name() -> String {
    "incident-feed".to_string()
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_store_expiry_interval() -> u64 {
    600 // 10 minutes
}

fn default_log_level() -> String {
    "incident_feed_core=info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::io::Write;

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_embedded_defaults_match_code_defaults() {
        let embedded: Config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let defaults = Config::default();

        assert_eq!(embedded.processing.queue_capacity, defaults.processing.queue_capacity);
        assert_eq!(embedded.processing.worker_count, defaults.processing.worker_count);
        assert_eq!(embedded.enhancement.queue_capacity, defaults.enhancement.queue_capacity);
        assert_eq!(embedded.enhancement.item_timeout_secs, defaults.enhancement.item_timeout_secs);
        assert_eq!(embedded.cache.cleanup_interval_secs, 300);
        assert_eq!(embedded.store.feed_grace_secs, 3600);
        assert_eq!(embedded.hashing.allowed_categories, defaults.hashing.allowed_categories);
        assert!(embedded.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml_file(
            r#"
            [processing]
            worker_count = 2

            [enhancement]
            latency_target_ms = 150
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.processing.worker_count, 2);
        assert_eq!(config.processing.queue_capacity, 5000);
        assert_eq!(config.enhancement.latency_target_ms, 150);
        assert_eq!(config.enhancement.worker_count, 3);
    }

    #[test]
    fn test_invalid_worker_count_rejected() {
        let file = toml_file("[processing]\nworker_count = 0\n");

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_missing_file_rejected() {
        let err = Config::from_file("/nonexistent/feed-core.toml").unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
