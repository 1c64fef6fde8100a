//! Configuration module for the yoz runtime.
//!
//! Layered figment loading (defaults, profile file, main file, `YOZ_*`
//! environment, programmatic overrides) followed by validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ExecutorSettings, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, PluginsConfig,
    RetryConfig, SpanEventConfig, TransportConfig, YozConfig,
};
pub use validation::validate_config;
