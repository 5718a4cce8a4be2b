//! Error types for the Switchyard framework.

use switchyard_core::{ApiError, StateError, StoreError, Update};
use thiserror::Error;

/// A defect in a handler registration, detected when the entry is registered.
#[derive(Debug, Clone, Error)]
pub enum DefinitionError {
    /// A capturing condition yields a different number of values than the
    /// method declares parameters.
    #[error(
        "method '{method}' binds {captures} captured groups but declares {params} parameters"
    )]
    ArityMismatch {
        method: String,
        captures: usize,
        params: usize,
    },

    /// More than one optional parameter was declared.
    #[error("method '{method}' declares more than one optional parameter")]
    MultipleOptional { method: String },

    /// An optional parameter is followed by a required one.
    #[error("optional parameter '{param}' of method '{method}' must be last")]
    OptionalNotLast { method: String, param: String },

    /// A parameter type has no registered mapper.
    #[error("parameter '{param}' of method '{method}' has unmapped type '{ty}'")]
    UnmappedType {
        method: String,
        param: String,
        ty: String,
    },

    /// A regular expression selector failed to compile.
    #[error("invalid pattern '{pattern}' in method '{method}': {reason}")]
    InvalidPattern {
        method: String,
        pattern: String,
        reason: String,
    },

    /// Two entries were registered with the same scope id.
    #[error("handler id '{0}' is already registered")]
    DuplicateScope(String),
}

/// Errors raised while mapping text to a typed argument.
#[derive(Debug, Clone, Error)]
pub enum MapError {
    /// No mapper is registered for the target type.
    #[error("no mapper registered for type '{0}'")]
    Unmapped(String),

    /// The mapper rejected the input.
    #[error("cannot parse '{value}' as {ty}: {reason}")]
    Parse {
        ty: String,
        value: String,
        reason: String,
    },

    /// A required argument is absent.
    #[error("missing required argument")]
    Missing,

    /// Two mappers claim the same type.
    #[error("mapper for type '{0}' conflicts with an existing registration")]
    Conflict(String),
}

impl MapError {
    pub fn parse(ty: impl Into<String>, value: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            ty: ty.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

/// A command argument could not be bound.
#[derive(Debug, Clone, Error)]
#[error("failed to bind command parameter {parameter_index}: {source}")]
pub struct CommandBindError {
    /// Position of the parameter that failed.
    pub parameter_index: usize,
    /// Underlying mapping error.
    #[source]
    pub source: MapError,
}

/// Errors that can occur while extracting handler inputs.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// A captured regex group could not be mapped.
    #[error("failed to bind captured group {index}: {source}")]
    Capture {
        index: usize,
        #[source]
        source: MapError,
    },

    /// An argument has a different type than requested.
    #[error("argument {index} is not a {expected}")]
    ArgType { index: usize, expected: &'static str },

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Arguments for a method could not be bound from its conditions.
#[derive(Debug, Clone, Error)]
pub enum BindError {
    #[error(transparent)]
    Capture(#[from] ExtractError),

    #[error(transparent)]
    Command(#[from] CommandBindError),
}

/// No registered handler could serve an update.
#[derive(Debug, Clone, Error)]
#[error("no handler found for {update}")]
pub struct NoHandlerError {
    /// The update that could not be routed.
    pub update: Box<Update>,
}

/// Errors surfaced while dispatching an update or running its handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    NoHandler(#[from] NoHandlerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// `change_handler` named an id that was never registered.
    #[error("no handler with id '{0}' is registered")]
    UnknownHandler(String),

    /// `change_handler` asked to run a default method that does not exist.
    #[error("handler '{0}' has no default method")]
    MissingDefault(String),

    /// The handler body returned an error.
    #[error("handler '{method}' failed: {source}")]
    Handler {
        method: String,
        #[source]
        source: anyhow::Error,
    },

    /// The handler body panicked.
    #[error("handler '{method}' panicked: {message}")]
    Panicked { method: String, message: String },

    /// The update source failed to deliver an update.
    #[error("update source failed: {0}")]
    Source(#[source] anyhow::Error),
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
