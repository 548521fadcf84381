use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Top-level configuration, layered from `config.toml` and the `ROLLUP`
/// environment prefix.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default)]
    pub live: LiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// Expected spacing between consecutive samples of one stream. Ingestion
    /// within this distance of an hour boundary also staleness-marks the
    /// previous hour.
    #[serde(default = "default_sample_period_secs")]
    pub sample_period_secs: u32,
}

fn default_workers() -> usize {
    2
}

fn default_batch_limit() -> usize {
    128
}

fn default_idle_backoff_ms() -> u64 {
    500
}

fn default_sample_period_secs() -> u32 {
    300
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_limit: default_batch_limit(),
            idle_backoff_ms: default_idle_backoff_ms(),
            sample_period_secs: default_sample_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_live_enabled")]
    pub enabled: bool,
}

fn default_live_enabled() -> bool {
    true
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: default_live_enabled(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("ROLLUP").separator("__"))
            .build()?;
        settings.try_deserialize()
    }
}
