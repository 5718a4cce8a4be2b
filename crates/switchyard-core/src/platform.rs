//! Platform trait.
//!
//! This module defines the `Platform` trait, the outbound surface handlers use
//! to talk back to the chat platform. Concrete clients marshal these calls to
//! the remote API; the engine only needs the operations below.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::keyboard::Keyboard;

/// Outbound connection to the chat platform.
///
/// Implementations are shared across every concurrent handler execution and
/// must be cheap to call from many tasks at once.
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Returns the identifier of this bot connection, used in logs.
    fn id(&self) -> &str;

    /// Returns the bot's username.
    ///
    /// Commands addressed as `/name@username` only match when the suffix
    /// equals this value.
    fn username(&self) -> Option<&str> {
        None
    }

    /// Sends a text message and returns the id of the new message.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> ApiResult<i64>;

    /// Replaces the text (and inline keyboard) of a message.
    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> ApiResult<()>;

    /// Acknowledges a button press.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> ApiResult<()>;

    /// Returns self as an `Arc<dyn Any>` for downcasting to the concrete client.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A shared Platform trait object.
pub type BoxedPlatform = Arc<dyn Platform>;
