//! Configuration for the Switchyard runtime.
//!
//! TOML files, environment variables and programmatic overrides are layered
//! with figment into a [`SwitchyardConfig`], then validated.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig,
    SwitchyardConfig,
};
pub use validation::validate_config;
