//! # Switchyard
//!
//! Conversation routing and dispatch for chat bots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌────────┐     ┌───────────┐
//! │ UpdateSource │────▶│ Dispatcher │────▶│ Router │────▶│ Scheduler │──▶ method
//! │  (runtime)   │     │  + state   │     │        │     │ per user/ │
//! └──────────────┘     └────────────┘     └────────┘     │ chat lane │
//!                                                        └───────────┘
//! ```
//!
//! - **Updates** arrive from an update source and carry a chat, user and
//!   message id.
//! - **State** is looked up per conversation and carried forward from the
//!   latest earlier message, so a conversation keeps its active handler.
//! - **Handler entries** group methods behind conditions; the router picks
//!   exactly one method per update.
//! - **The scheduler** runs methods of one conversation one at a time, in
//!   arrival order.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use switchyard::prelude::*;
//!
//! async fn start(ctx: HandlerContext) -> anyhow::Result<()> {
//!     ctx.change_handler(Some("main"), true).await?;
//!     Ok(())
//! }
//!
//! async fn menu(ctx: HandlerContext) -> Reply {
//!     Reply::text("Main menu").keyboard(ctx.reply_keyboard())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SwitchyardRuntime::builder()
//!         .register(
//!             HandlerEntry::new("global")
//!                 .method(Method::new("start", start).when(Condition::command("start"))),
//!         )
//!         .register_as(
//!             "main",
//!             HandlerEntry::new("main")
//!                 .private_only()
//!                 .method(Method::new("menu", menu).as_default()),
//!         )
//!         .build()?;
//!
//!     runtime.run(my_source()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `json-log`: JSON log output

pub use switchyard_core as core;
pub use switchyard_framework as framework;
pub use switchyard_runtime as runtime;

/// Commonly used types for building bots.
///
/// ```rust,ignore
/// use switchyard::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use switchyard_runtime::{
        ChannelSource, ConfigLoader, StreamSource, SwitchyardConfig, SwitchyardRuntime,
        UpdateSource,
    };

    // Registry
    pub use switchyard_framework::{
        Condition, Dispatcher, HandlerEntry, Method, Param, Selector, Threading,
    };

    // Handlers and extractors
    pub use switchyard_framework::{
        Args, CallbackData, FromInvocation, HandlerContext, Params, Reply, Text,
    };

    // Error collaborators
    pub use switchyard_framework::{
        CommandErrorHandler, DispatchError, ErrorHandler, ErrorSource, Outcome,
    };

    // Core types
    pub use switchyard_core::{
        BoxedPlatform, ConversationState, Keyboard, MemoryStateStore, Platform, StateStore,
        Update, UpdateKind,
    };
}
