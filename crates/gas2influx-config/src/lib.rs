// gas2influx-config - Runtime configuration
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from GAS2INFLUX_CONFIG env var
// 3. Config file contents from GAS2INFLUX_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.gas2influx.toml)
// 5. Built-in defaults (lowest priority)
//
// CLI flags are layered on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub transform: TransformConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub artifacts: ArtifactConfig,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Run-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory scanned for `*.csv` captures.
    pub input_dir: String,
    /// Files processed in parallel.
    pub max_concurrency: usize,
    pub delivery: Delivery,
    /// Whole-run deadline; 0 disables it.
    pub run_timeout_secs: u64,
}

impl PipelineConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: "./data".to_string(),
            max_concurrency: 4,
            delivery: Delivery::AtMostOnce,
            run_timeout_secs: 600,
        }
    }
}

/// Ordering of ledger admission relative to the sink write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Delivery {
    /// Admit first, then write. A failure after admission loses the file.
    #[default]
    AtMostOnce,
    /// Write first, admit after a confirmed flush. A failure before admission
    /// rewrites the file on the next run.
    AtLeastOnce,
}

impl std::fmt::Display for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delivery::AtMostOnce => write!(f, "at-most-once"),
            Delivery::AtLeastOnce => write!(f, "at-least-once"),
        }
    }
}

impl std::str::FromStr for Delivery {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "at-most-once" | "admit-first" => Ok(Delivery::AtMostOnce),
            "at-least-once" | "write-first" => Ok(Delivery::AtLeastOnce),
            _ => anyhow::bail!(
                "Unsupported delivery mode: {}. Supported: at-most-once, at-least-once",
                s
            ),
        }
    }
}

/// Transformer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Inclusive upper bound on `Time (s)`.
    pub window_secs: u64,
    pub row_errors: RowErrors,
    /// Rows per Arrow chunk when encoding the artifact.
    pub chunk_rows: usize,
    pub timeout_secs: u64,
}

impl TransformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            window_secs: 86_400,
            row_errors: RowErrors::Skip,
            chunk_rows: 8 * 1024,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowErrors {
    #[default]
    Skip,
    Fail,
}

impl std::str::FromStr for RowErrors {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "skip" | "drop" => Ok(RowErrors::Skip),
            "fail" | "abort" => Ok(RowErrors::Fail),
            _ => anyhow::bail!("Unsupported row error policy: {}. Supported: skip, fail", s),
        }
    }
}

/// Admission ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file.
    pub path: String,
    pub timeout_secs: u64,
    /// How long SQLite waits while another writer holds the lock.
    pub busy_timeout_ms: u64,
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: "./gas2influx.db".to_string(),
            timeout_secs: 10,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Intermediate Parquet artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Directory holding `<stem>.parquet` files between stages.
    pub path: String,
    pub row_group_size: usize,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            path: "./artifacts".to_string(),
            row_group_size: 32 * 1024,
        }
    }
}

/// Time-series sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub backend: SinkBackend,
    pub url: String,
    pub org: String,
    pub bucket: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub measurement: String,
    /// Measurement columns written as tags; every other column is a field.
    pub tag_columns: Vec<String>,
    pub timeout_secs: u64,
    pub max_lines_per_request: usize,
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackend::Influxdb,
            url: "http://localhost:8086".to_string(),
            org: "my-org".to_string(),
            bucket: "gas-quality".to_string(),
            token: String::new(),
            measurement: "gas".to_string(),
            tag_columns: vec!["Temperature (C)".to_string()],
            timeout_secs: 30,
            max_lines_per_request: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    #[default]
    Influxdb,
    Stdout,
}

impl std::fmt::Display for SinkBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkBackend::Influxdb => write!(f, "influxdb"),
            SinkBackend::Stdout => write!(f, "stdout"),
        }
    }
}

impl std::str::FromStr for SinkBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "influxdb" | "influx" => Ok(SinkBackend::Influxdb),
            "stdout" | "dry-run" => Ok(SinkBackend::Stdout),
            _ => anyhow::bail!("Unsupported sink backend: {}. Supported: influxdb, stdout", s),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl RuntimeConfig {
    /// Load configuration from a specific file path (for CLI usage).
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Load configuration from all sources with priority, using defaults when
    /// no config file is configured or present. Unreadable or malformed files
    /// are errors.
    pub fn load_or_default() -> Result<Self> {
        sources::load_or_default()
    }

    /// Merge another config into this one (used for TOML layering).
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.pipeline = other.pipeline;
        self.transform = other.transform;
        self.ledger = other.ledger;
        self.artifacts = other.artifacts;
        self.sink = other.sink;
        self.logging = other.logging;
    }

    /// Apply environment overrides from a custom source.
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Build a configuration from inline TOML plus overrides supplied by an
    /// `EnvSource`, without touching the host environment or filesystem.
    pub fn load_with_env<E: EnvSource>(inline_config: Option<&str>, env: &E) -> Result<Self> {
        let mut config = RuntimeConfig::default();

        if let Some(inline) = inline_config {
            let file_config: RuntimeConfig =
                toml::from_str(inline).context("Failed to parse inline config content")?;
            config.merge(file_config);
        }

        config.apply_env_overrides_from(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
