//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use yoz_core::ExecutorConfig;
use yoz_framework::{BotSettings, PluginSettings};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YozConfig {
    /// Logging output and filters.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Nickname, command prefixes and blocked senders.
    #[serde(default)]
    pub bot: BotSettings,

    /// Handler execution bounds.
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Plugin discovery and per-plugin settings.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Event source reconnect policy.
    #[serde(default)]
    pub transport: TransportConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Newline-delimited JSON (requires `json-log`).
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// The file at `logging.file_path`.
    File,
}

/// How often the log file is rolled over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level. `RUST_LOG` takes precedence when set.
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file for [`LogOutput::File`].
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Rotated files kept on disk.
    pub max_files: u32,
    pub thread_ids: bool,
    /// Include source file and line.
    pub file_location: bool,
    pub span_events: SpanEventConfig,
    /// Per-target levels, e.g. `yoz_framework = "debug"`.
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            max_files: 5,
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Handler execution bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Time a handler may run before it is reported as timed out.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Upper bound on concurrently running handlers. Unbounded when unset.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            task_timeout_ms: default_task_timeout_ms(),
            max_concurrent: None,
        }
    }
}

impl ExecutorSettings {
    pub fn to_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            timeout: Duration::from_millis(self.task_timeout_ms),
            max_concurrent: self.max_concurrent,
        }
    }
}

fn default_task_timeout_ms() -> u64 {
    1000
}

// =============================================================================
// Plugins
// =============================================================================

/// Plugin discovery and storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Root directory scanned for plugin subdirectories.
    #[serde(default = "default_plugin_directory")]
    pub directory: PathBuf,

    /// Manifest file name inside each plugin directory.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Base of per-plugin configuration directories.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Base of per-plugin data directories.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Settings sections keyed by plugin name, handed to `PluginContext::config`.
    #[serde(default)]
    pub settings: HashMap<String, Value>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            manifest_file: default_manifest_file(),
            config_dir: default_config_dir(),
            data_dir: default_data_dir(),
            settings: HashMap::new(),
        }
    }
}

impl PluginsConfig {
    pub fn to_plugin_settings(&self) -> PluginSettings {
        PluginSettings {
            manifest_file: self.manifest_file.clone(),
            config_dir: self.config_dir.clone(),
            data_dir: self.data_dir.clone(),
            sections: self.settings.clone(),
        }
    }
}

fn default_plugin_directory() -> PathBuf {
    PathBuf::from("module")
}

fn default_manifest_file() -> String {
    "manifest.json".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("config")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

// =============================================================================
// Transport
// =============================================================================

/// Event source settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Reconnect policy after a disconnect.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before the zero-based `attempt`, capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
