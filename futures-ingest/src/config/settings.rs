//! Application settings and configuration

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Environment prefix for layered settings (e.g. `FUTURES_INGEST__DATABASE__URL`)
pub const ENV_PREFIX: &str = "FUTURES_INGEST";

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Databento provider configuration
    #[serde(default)]
    pub databento: DatabentoSettings,
    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,
    /// Ingestion behaviour
    #[serde(default)]
    pub ingest: IngestSettings,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL. Empty means "connect with the individual fields below".
    #[serde(default)]
    pub url: String,
    /// Server host, used when `url` is empty
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Password, passed to the driver as-is
    #[serde(default)]
    pub password: Option<String>,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            host: None,
            port: None,
            name: None,
            user: None,
            password: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// Databento provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabentoSettings {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Default dataset (e.g., "GLBX.MDP3" for CME Globex)
    #[serde(default = "default_databento_dataset")]
    pub default_dataset: String,
}

fn default_databento_dataset() -> String {
    "GLBX.MDP3".to_string()
}

impl Default for DatabentoSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            default_dataset: default_databento_dataset(),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Schema (namespace) holding the OHLCV tables
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Rows per multi-row INSERT statement
    #[serde(default = "default_batch_size")]
    pub batch_insert_size: usize,
    /// Convert tables to TimescaleDB hypertables when the extension is present
    #[serde(default)]
    pub create_hypertable: bool,
}

fn default_namespace() -> String {
    "futures_data".to_string()
}

fn default_batch_size() -> usize {
    1000
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            batch_insert_size: default_batch_size(),
            create_hypertable: false,
        }
    }
}

/// Ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// IANA timezone used to read naive provider timestamps
    #[serde(default = "default_source_timezone")]
    pub source_timezone: String,
    /// Decimal places kept on prices
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,
    /// Windows ingested concurrently by `run_all`
    #[serde(default = "default_max_concurrent_windows")]
    pub max_concurrent_windows: usize,
}

fn default_source_timezone() -> String {
    "UTC".to_string()
}

fn default_price_decimals() -> u32 {
    2
}

fn default_max_concurrent_windows() -> usize {
    4
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            source_timezone: default_source_timezone(),
            price_decimals: default_price_decimals(),
            max_concurrent_windows: default_max_concurrent_windows(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix(ENV_PREFIX)
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            // Add environment-specific configuration
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Add local overrides (not checked into git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Add environment variables (e.g., FUTURES_INGEST__DATABASE__URL)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = s.try_deserialize()?;
        settings.apply_env_fallbacks(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Get the configuration directory path
    fn config_dir() -> String {
        std::env::var("FUTURES_INGEST_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Fill unset credentials from the conventional environment variables.
    ///
    /// `DATABENTO_API_KEY` supplies the API key. `DATABASE_URL` supplies the database URL.
    /// Without one, unset connection fields come from `DB_HOST`, `DB_PORT`, `DB_NAME`,
    /// `DB_USER` and `DB_PASSWORD`.
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.databento.api_key.is_empty() {
            if let Some(key) = lookup("DATABENTO_API_KEY") {
                self.databento.api_key = key;
            }
        }

        if !self.database.url.is_empty() {
            return;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
            return;
        }

        let db = &mut self.database;
        db.host = db.host.take().or_else(|| lookup("DB_HOST"));
        db.port = db.port.or_else(|| lookup("DB_PORT").and_then(|p| p.parse().ok()));
        db.name = db.name.take().or_else(|| lookup("DB_NAME"));
        db.user = db.user.take().or_else(|| lookup("DB_USER"));
        db.password = db.password.take().or_else(|| lookup("DB_PASSWORD"));
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.batch_insert_size == 0 {
            return Err(ConfigError::Message(
                "storage.batch_insert_size must be at least 1".to_string(),
            ));
        }
        if !is_identifier(&self.storage.namespace) {
            return Err(ConfigError::Message(format!(
                "storage.namespace '{}' is not a valid SQL identifier",
                self.storage.namespace
            )));
        }
        if self.ingest.max_concurrent_windows == 0 {
            return Err(ConfigError::Message(
                "ingest.max_concurrent_windows must be at least 1".to_string(),
            ));
        }
        if self.ingest.source_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "ingest.source_timezone '{}' is not an IANA timezone",
                self.ingest.source_timezone
            )));
        }
        Ok(())
    }
}

/// Lowercase ASCII identifier usable unquoted in SQL
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
