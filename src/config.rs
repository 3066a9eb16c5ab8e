use crate::error::ConfigError;
use crate::ledger::DEFAULT_LEDGER_CAPACITY;
use crate::queue::DEFAULT_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/ingest";

/// Tracker configuration.
///
/// Every field has a default, so a JSON document only needs the fields it
/// changes:
///
/// ```
/// use shoptrace::TrackerConfig;
///
/// let config = TrackerConfig::from_json(r#"{"batch_size": 25}"#).unwrap();
/// assert_eq!(config.batch_size, 25);
/// assert_eq!(config.ledger_capacity, 50);
/// assert!(!config.consent_required);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Ingestion endpoint receiving both single events and batches.
    pub endpoint: String,
    /// Queued events per batch request.
    pub batch_size: usize,
    /// Gate tracking on GDPR consent.
    pub consent_required: bool,
    /// Log every event at info level and bypass the consent gate.
    pub debug_mode: bool,
    /// Directory holding the offline store, dedup ledger and consent.
    pub storage_dir: PathBuf,
    /// Order ids remembered by the dedup ledger.
    pub ledger_capacity: usize,
    pub request_timeout_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            consent_required: false,
            debug_mode: false,
            storage_dir: PathBuf::from(".shoptrace"),
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            request_timeout_ms: 10_000,
        }
    }
}

impl TrackerConfig {
    /// Start a builder for the given endpoint.
    pub fn builder(endpoint: impl Into<String>) -> TrackerConfigBuilder {
        TrackerConfigBuilder {
            config: TrackerConfig {
                endpoint: endpoint.into(),
                ..TrackerConfig::default()
            },
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.ledger_capacity == 0 {
            return Err(ConfigError::InvalidLedgerCapacity);
        }
        self.endpoint_url()?;
        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            source,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Whether the consent gate is active at all.
    pub fn gates_on_consent(&self) -> bool {
        self.consent_required && !self.debug_mode
    }
}

/// Builder for [`TrackerConfig`].
#[derive(Debug, Clone)]
pub struct TrackerConfigBuilder {
    config: TrackerConfig,
}

impl TrackerConfigBuilder {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn consent_required(mut self, required: bool) -> Self {
        self.config.consent_required = required;
        self
    }

    pub fn debug_mode(mut self, debug: bool) -> Self {
        self.config.debug_mode = debug;
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    pub fn ledger_capacity(mut self, capacity: usize) -> Self {
        self.config.ledger_capacity = capacity;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<TrackerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
