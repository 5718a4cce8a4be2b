//! Switchyard Runtime - orchestration layer for the Switchyard engine.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `SwitchyardConfig`)
//! - Logging setup from configuration (`LoggingBuilder`)
//! - The receive loop over an update source (`SwitchyardRuntime`)
//!
//! ```ignore
//! use switchyard_runtime::{ChannelSource, SwitchyardRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SwitchyardRuntime::builder()
//!         .register(main_menu())
//!         .build()?;
//!
//!     let (source, tx) = ChannelSource::new(platform, 64);
//!     spawn_poller(tx);
//!
//!     runtime.run(source).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod source;

pub use config::{
    ConfigError, ConfigLoader, ConfigResult, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, SwitchyardConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, RuntimeStats, SwitchyardRuntime};
pub use source::{ChannelSource, StreamSource, UpdateSource};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and span helpers.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
