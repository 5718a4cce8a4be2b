//! Unified error types for the Switchyard core.
//!
//! This module provides the error types shared by the state model, the state
//! store and the platform surface. Routing and dispatch errors live in
//! `switchyard-framework`.

use thiserror::Error;

// =============================================================================
// State Errors
// =============================================================================

/// Errors raised by the typed helpers on
/// [`ConversationState`](crate::state::ConversationState).
#[derive(Debug, Error)]
pub enum StateError {
    /// A value could not be encoded into the state bag.
    #[error("failed to encode state value '{key}': {source}")]
    Encode {
        /// The state key being written.
        key: String,
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored value could not be decoded into the requested type.
    #[error("failed to decode state value '{key}': {source}")]
    Decode {
        /// The state key being read.
        key: String,
        /// Underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors that can occur in a [`StateStore`](crate::store::StateStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backend is unreachable or refused the operation.
    #[error("state backend unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for outbound platform calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The platform rejected the call.
    #[error("platform error ({code}): {description}")]
    Rejected { code: i64, description: String },
    /// The update does not carry the identifiers the call needs.
    #[error("missing {0} for platform call")]
    MissingTarget(&'static str),
}

impl ApiError {
    /// Returns `true` if the platform reported that an edit changed nothing.
    ///
    /// Editing a message to identical content is rejected by most platforms;
    /// callers usually want to treat that as success.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::Rejected { description, .. } if description.contains("not modified"))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for state store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for typed state access.
pub type StateResult<T> = Result<T, StateError>;

/// Result type for platform calls.
pub type ApiResult<T> = Result<T, ApiError>;
