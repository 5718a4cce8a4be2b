//! # Switchyard Core
//!
//! Core types of the Switchyard conversational routing engine.
//!
//! This crate holds everything the routing engine and platform clients share:
//!
//! - **Event model**: inbound updates and their accessors ([`Update`])
//! - **Conversation state**: per-scope records with a typed value bag
//!   ([`ConversationState`], [`ScopeKey`])
//! - **State storage**: the [`StateStore`] trait with carry-forward lookup and
//!   the in-process [`MemoryStateStore`]
//! - **Platform surface**: the outbound [`Platform`] trait and [`Keyboard`]
//!   layouts
//!
//! Routing, scheduling and handler registration live in
//! `switchyard-framework`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchyard_core::{MemoryStateStore, StateStore, Update};
//!
//! let store = MemoryStateStore::new();
//! let mut state = store.state_for_event(&update).await?;
//! state.set("step", &2)?;
//! store.upsert(&state).await?;
//! ```

pub mod error;
pub mod event;
pub mod keyboard;
pub mod platform;
pub mod state;
pub mod store;

pub use error::{ApiError, ApiResult, StateError, StateResult, StoreError, StoreResult};
pub use event::{
    CallbackQuery, Chat, ChatKind, ChosenInlineResult, InlineQuery, Message, MessageKind, Update,
    UpdateKind, User,
};
pub use keyboard::{InlineButton, Keyboard};
pub use platform::{BoxedPlatform, Platform};
pub use state::{ConversationState, ScopeKey};
pub use store::{BoxedStateStore, MemoryStateStore, StateStore};
