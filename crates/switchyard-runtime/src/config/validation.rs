//! Configuration validation.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, SwitchyardConfig};
use switchyard_framework::DispatchOptions;

/// Validates the entire configuration.
pub fn validate_config(config: &SwitchyardConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_dispatch(&config.dispatch)?;
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.max_files == 0 {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }

    if let Some(module) = logging.filters.keys().find(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid logging filter target: {module:?}"
        )));
    }

    Ok(())
}

fn validate_dispatch(dispatch: &DispatchOptions) -> ConfigResult<()> {
    if let Some(username) = &dispatch.bot_username {
        let username = username.trim_start_matches('@');
        if username.is_empty() || username.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid dispatch.bot_username: {:?}",
                dispatch.bot_username
            )));
        }
    }
    Ok(())
}
