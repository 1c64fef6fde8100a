//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{ExecutorSettings, LogOutput, LoggingConfig, PluginsConfig, RetryConfig, YozConfig};
use yoz_framework::BotSettings;

/// Validates the entire configuration.
pub fn validate_config(config: &YozConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_bot_settings(&config.bot)?;
    validate_executor_settings(&config.executor)?;
    validate_plugins_config(&config.plugins)?;
    validate_retry_config(&config.transport.retry)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.filters.keys().any(|target| target.trim().is_empty()) {
        return Err(ConfigError::validation("Log filter targets cannot be empty"));
    }

    Ok(())
}

fn validate_bot_settings(bot: &BotSettings) -> ConfigResult<()> {
    if bot.command_prefix.is_empty() {
        return Err(ConfigError::validation("Command prefix cannot be empty"));
    }

    if bot.alt_command_prefixes.iter().any(String::is_empty) {
        return Err(ConfigError::validation(
            "Alternate command prefixes cannot be empty",
        ));
    }

    Ok(())
}

fn validate_executor_settings(executor: &ExecutorSettings) -> ConfigResult<()> {
    if executor.task_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Task timeout must be greater than 0",
        ));
    }

    if executor.max_concurrent == Some(0) {
        return Err(ConfigError::validation(
            "Max concurrent tasks must be greater than 0 when set",
        ));
    }

    Ok(())
}

fn validate_plugins_config(plugins: &PluginsConfig) -> ConfigResult<()> {
    if plugins.manifest_file.trim().is_empty() {
        return Err(ConfigError::missing_field("plugins.manifest_file"));
    }

    if plugins.directory.as_os_str().is_empty() {
        return Err(ConfigError::missing_field("plugins.directory"));
    }

    Ok(())
}

/// Validates retry configuration.
fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = YozConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_empty_prefix() {
        let mut config = YozConfig::default();
        config.bot.command_prefix.clear();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        let mut config = YozConfig::default();
        config.bot.alt_command_prefixes.push(String::new());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_executor_bounds() {
        let mut config = YozConfig::default();
        config.executor.task_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = YozConfig::default();
        config.executor.max_concurrent = Some(0);
        assert!(validate_config(&config).is_err());

        config.executor.max_concurrent = Some(8);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_retry_multiplier() {
        let mut config = YozConfig::default();
        config.transport.retry.backoff_multiplier = 0.5;
        assert!(validate_config(&config).is_err());

        let mut config = YozConfig::default();
        config.transport.retry.max_delay_ms = 10;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = YozConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "logging.file_path"
        ));

        config.logging.file_path = Some("yoz.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_missing_manifest_name() {
        let mut config = YozConfig::default();
        config.plugins.manifest_file = " ".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }
}
