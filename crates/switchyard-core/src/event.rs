//! Event model for the Switchyard engine.
//!
//! This module provides the inbound event types delivered by the chat
//! platform:
//!
//! - [`Update`] - One inbound notification with its [`UpdateKind`] payload
//! - [`Message`] - A chat message (also used for edits and channel posts)
//! - [`CallbackQuery`] - A button press on an inline keyboard
//! - [`InlineQuery`] / [`ChosenInlineResult`] - Inline-mode queries
//!
//! Every accessor on [`Update`] is total: identifiers that a variant does not
//! carry come back as `None` instead of panicking, so conditions and the
//! scheduler can inspect any update uniformly.
//!
//! ```rust,ignore
//! use switchyard_core::Update;
//!
//! let update: Update = serde_json::from_str(raw)?;
//! if let Some(text) = update.text() {
//!     println!("{} wrote {text}", update.user_id().unwrap_or_default());
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::ScopeKey;

// ============================================================================
// Chats and users
// ============================================================================

/// Classification of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// One-to-one conversation with a user.
    Private,
    /// Small group chat.
    Group,
    /// Large group chat.
    Supergroup,
    /// Broadcast channel.
    Channel,
}

/// A chat an update originated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatKind,
}

impl Chat {
    /// Creates a private chat with the given id.
    pub fn private(id: i64) -> Self {
        Self {
            id,
            kind: ChatKind::Private,
        }
    }

    /// Creates a group chat with the given id.
    pub fn group(id: i64) -> Self {
        Self {
            id,
            kind: ChatKind::Group,
        }
    }
}

/// A platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    /// Creates a user without a username.
    pub fn new(id: i64) -> Self {
        Self { id, username: None }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Content classification of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Photo,
    Document,
    Sticker,
    Voice,
    Other,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub text: Option<String>,
}

impl Message {
    /// Creates a text message.
    pub fn text(message_id: i64, chat: Chat, from: Option<User>, text: impl Into<String>) -> Self {
        Self {
            message_id,
            chat,
            from,
            kind: MessageKind::Text,
            text: Some(text.into()),
        }
    }
}

/// A button press on an inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    /// The message the keyboard was attached to, if still accessible.
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

/// An inline-mode query typed by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    pub query: String,
}

/// The inline result a user picked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenInlineResult {
    pub result_id: String,
    pub from: User,
    pub query: String,
}

// ============================================================================
// Update
// ============================================================================

/// Payload of an [`Update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateKind {
    Message(Message),
    EditedMessage(Message),
    ChannelPost(Message),
    CallbackQuery(CallbackQuery),
    InlineQuery(InlineQuery),
    ChosenInlineResult(ChosenInlineResult),
}

/// One inbound notification from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub id: i64,
    #[serde(flatten)]
    pub kind: UpdateKind,
}

impl Update {
    /// Creates an update from its payload.
    pub fn new(id: i64, kind: UpdateKind) -> Self {
        Self { id, kind }
    }

    /// Returns the message this update carries or refers to.
    ///
    /// For button presses this is the message the keyboard belongs to.
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(m) | UpdateKind::EditedMessage(m) | UpdateKind::ChannelPost(m) => {
                Some(m)
            }
            UpdateKind::CallbackQuery(q) => q.message.as_ref(),
            UpdateKind::InlineQuery(_) | UpdateKind::ChosenInlineResult(_) => None,
        }
    }

    /// Returns the chat id, if the update belongs to a chat.
    pub fn chat_id(&self) -> Option<i64> {
        self.message().map(|m| m.chat.id)
    }

    /// Returns the id of the user who caused the update.
    pub fn user_id(&self) -> Option<i64> {
        match &self.kind {
            UpdateKind::Message(m) | UpdateKind::EditedMessage(m) | UpdateKind::ChannelPost(m) => {
                m.from.as_ref().map(|u| u.id)
            }
            UpdateKind::CallbackQuery(q) => Some(q.from.id),
            UpdateKind::InlineQuery(q) => Some(q.from.id),
            UpdateKind::ChosenInlineResult(r) => Some(r.from.id),
        }
    }

    /// Returns the message id this update is scoped to.
    pub fn message_id(&self) -> Option<i64> {
        self.message().map(|m| m.message_id)
    }

    /// Returns `true` if the update happened in a private chat.
    ///
    /// Inline queries have no chat and always report `false`.
    pub fn is_private(&self) -> bool {
        self.message()
            .is_some_and(|m| m.chat.kind == ChatKind::Private)
    }

    /// Returns `true` for button presses.
    pub fn is_callback(&self) -> bool {
        matches!(self.kind, UpdateKind::CallbackQuery(_))
    }

    /// Returns the text of a new text message.
    ///
    /// Edited messages and channel posts are deliberately excluded; text
    /// conditions only react to fresh input.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::Message(m) => m.text.as_deref(),
            _ => None,
        }
    }

    /// Returns the content kind of a new message.
    pub fn message_kind(&self) -> Option<MessageKind> {
        match &self.kind {
            UpdateKind::Message(m) => Some(m.kind),
            _ => None,
        }
    }

    /// Returns the button data of a callback query.
    pub fn callback_data(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::CallbackQuery(q) => q.data.as_deref(),
            _ => None,
        }
    }

    /// Returns the callback query id, used to acknowledge a button press.
    pub fn callback_id(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::CallbackQuery(q) => Some(&q.id),
            _ => None,
        }
    }

    /// Returns the query string of an inline query.
    pub fn inline_query(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::InlineQuery(q) => Some(&q.query),
            _ => None,
        }
    }

    /// Returns the query string of a chosen inline result.
    pub fn inline_result_query(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::ChosenInlineResult(r) => Some(&r.query),
            _ => None,
        }
    }

    /// Returns a short name of the update kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            UpdateKind::Message(_) => "message",
            UpdateKind::EditedMessage(_) => "edited_message",
            UpdateKind::ChannelPost(_) => "channel_post",
            UpdateKind::CallbackQuery(_) => "callback_query",
            UpdateKind::InlineQuery(_) => "inline_query",
            UpdateKind::ChosenInlineResult(_) => "chosen_inline_result",
        }
    }

    /// Returns the conversation scope key, if the update has a chat and a
    /// message to anchor state to.
    pub fn scope_key(&self) -> Option<ScopeKey> {
        Some(ScopeKey {
            chat_id: self.chat_id()?,
            user_id: self.user_id(),
            message_id: self.message_id()?,
        })
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind_name(), self.id)?;
        if let Some(message_id) = self.message_id() {
            write!(f, " message {message_id}")?;
        }
        if let Some(user_id) = self.user_id() {
            write!(f, " by {user_id}")?;
        }
        if let Some(text) = self.text() {
            write!(f, ", text: {text}")?;
        }
        if let Some(data) = self.callback_data() {
            write!(f, ", data: {data}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(data: &str) -> Update {
        Update::new(
            7,
            UpdateKind::CallbackQuery(CallbackQuery {
                id: "cb-1".into(),
                from: User::new(42),
                message: Some(Message::text(10, Chat::private(42), None, "menu")),
                data: Some(data.into()),
            }),
        )
    }

    #[test]
    fn test_callback_accessors() {
        let update = callback("open");
        assert_eq!(update.chat_id(), Some(42));
        assert_eq!(update.user_id(), Some(42));
        assert_eq!(update.message_id(), Some(10));
        assert_eq!(update.callback_data(), Some("open"));
        assert_eq!(update.text(), None);
        assert!(update.is_callback());
        assert!(update.is_private());
    }

    #[test]
    fn test_inline_query_has_no_scope() {
        let update = Update::new(
            1,
            UpdateKind::InlineQuery(InlineQuery {
                id: "q".into(),
                from: User::new(5),
                query: "cats".into(),
            }),
        );
        assert_eq!(update.scope_key(), None);
        assert_eq!(update.user_id(), Some(5));
        assert!(!update.is_private());
    }

    #[test]
    fn test_deserialize_tagged_update() {
        let raw = r#"{
            "id": 3,
            "type": "message",
            "message_id": 12,
            "chat": { "id": -100, "kind": "group" },
            "from": { "id": 9 },
            "text": "/start"
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        assert_eq!(update.text(), Some("/start"));
        assert_eq!(update.chat_id(), Some(-100));
        assert!(!update.is_private());
        assert_eq!(update.message_kind(), Some(MessageKind::Text));
    }

    #[test]
    fn test_display_includes_text() {
        let update = Update::new(
            2,
            UpdateKind::Message(Message::text(4, Chat::private(1), Some(User::new(1)), "hi")),
        );
        assert_eq!(update.to_string(), "message #2 message 4 by 1, text: hi");
    }
}
