//! Configuration management for the sync runtime.

use quill_engine::{AutoSaveConfig, ConflictPolicy, RetryPolicy};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Debounce, periodic flush and error display timers
    pub autosave: AutoSaveConfig,
    /// Periodic drain interval
    pub sync_interval: Duration,
    /// Items requested from the queue per drain pass
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub conflict_policy: ConflictPolicy,
    /// Directory holding document records and the queue
    pub data_dir: PathBuf,
    /// Base URL of the remote store
    pub remote_url: Option<String>,
    /// Bearer token sent to the remote store
    pub auth_token: Option<String>,
    /// Maximum bytes of document records on disk
    pub storage_capacity: Option<u64>,
    /// Timeout for a single remote call
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave: AutoSaveConfig::default(),
            sync_interval: Duration::from_secs(30),
            batch_size: 25,
            retry: RetryPolicy::default(),
            conflict_policy: ConflictPolicy::default(),
            data_dir: PathBuf::from("quill-data"),
            remote_url: None,
            auth_token: None,
            storage_capacity: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `QUILL_*` environment variables, reading a
    /// `.env` file first if one exists. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = parse(&lookup, "QUILL_DEBOUNCE_MS")? {
            config.autosave.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "QUILL_PERIODIC_SAVE_MS")? {
            config.autosave.periodic = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "QUILL_ERROR_WINDOW_MS")? {
            config.autosave.error_window = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "QUILL_SYNC_INTERVAL_MS")? {
            config.sync_interval = Duration::from_millis(ms);
        }
        if let Some(size) = parse(&lookup, "QUILL_BATCH_SIZE")? {
            config.batch_size = size;
        }
        if let Some(retries) = parse(&lookup, "QUILL_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = parse(&lookup, "QUILL_RETRY_BASE_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "QUILL_RETRY_MAX_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(policy) = parse(&lookup, "QUILL_CONFLICT_POLICY")? {
            config.conflict_policy = policy;
        }
        if let Some(dir) = lookup("QUILL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.remote_url = lookup("QUILL_REMOTE_URL").filter(|s| !s.is_empty());
        config.auth_token = lookup("QUILL_AUTH_TOKEN").filter(|s| !s.is_empty());
        config.storage_capacity = parse(&lookup, "QUILL_STORAGE_CAPACITY")?;
        if let Some(ms) = parse(&lookup, "QUILL_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_autosave(mut self, autosave: AutoSaveConfig) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_remote(mut self, url: impl Into<String>, token: Option<String>) -> Self {
        self.remote_url = Some(url.into());
        self.auth_token = token;
        self
    }

    pub fn with_storage_capacity(mut self, bytes: u64) -> Self {
        self.storage_capacity = Some(bytes);
        self
    }

    /// Check values that would stall the timers or the drain loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "QUILL_BATCH_SIZE",
                reason: "must be at least 1".into(),
            });
        }
        if self.sync_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "QUILL_SYNC_INTERVAL_MS",
                reason: "must be positive".into(),
            });
        }
        if self.autosave.periodic.is_zero() {
            return Err(ConfigError::Invalid {
                key: "QUILL_PERIODIC_SAVE_MS",
                reason: "must be positive".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Invalid {
                key: "jitter",
                reason: "must be between 0 and 1".into(),
            });
        }
        Ok(())
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("QUILL_REMOTE_URL is required")]
    MissingRemoteUrl,

    #[error("invalid remote url: {0}")]
    InvalidRemoteUrl(String),
}
