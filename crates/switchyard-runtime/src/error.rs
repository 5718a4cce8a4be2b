//! Runtime error types.

use switchyard_framework::{DefinitionError, MapError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The handler registry failed verification.
    #[error("invalid handler registry: {0}")]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Map(#[from] MapError),

    /// `run` was called while the runtime was already receiving updates.
    #[error("runtime is already running")]
    AlreadyRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
