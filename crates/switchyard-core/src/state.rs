//! Conversation state.
//!
//! A [`ConversationState`] is the record kept per conversation scope. It holds
//! the handler that currently owns the conversation, an optional sub-menu
//! discriminator, and a bag of JSON-encoded values the application reads and
//! writes through typed helpers.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Identity of a stored conversation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub message_id: i64,
}

impl ScopeKey {
    pub fn new(chat_id: i64, user_id: Option<i64>, message_id: i64) -> Self {
        Self {
            chat_id,
            user_id,
            message_id,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user_id {
            Some(user) => write!(f, "{}/{}/{}", self.chat_id, user, self.message_id),
            None => write!(f, "{}/-/{}", self.chat_id, self.message_id),
        }
    }
}

/// State record for one conversation scope.
///
/// Mutations through the helpers mark the record dirty and stamp
/// `last_updated`; the dispatcher persists dirty records after a handler
/// completes when auto-save is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub chat_id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub message_id: i64,
    #[serde(default)]
    pub handler_id: Option<String>,
    #[serde(default)]
    pub sub_menu: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, String>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    detached: bool,
}

impl ConversationState {
    /// Creates an empty record for `key`.
    pub fn new(key: ScopeKey) -> Self {
        Self {
            chat_id: key.chat_id,
            user_id: key.user_id,
            message_id: key.message_id,
            handler_id: None,
            sub_menu: None,
            data: HashMap::new(),
            last_updated: Utc::now(),
            dirty: false,
            detached: false,
        }
    }

    /// Creates a record for events that have no chat/message scope.
    ///
    /// Detached records are usable by handlers but are never persisted.
    pub fn detached(user_id: Option<i64>) -> Self {
        let mut state = Self::new(ScopeKey::new(0, user_id, 0));
        state.detached = true;
        state
    }

    /// Creates a record for `key` that continues `previous`.
    ///
    /// The handler id and data bag are copied; the sub-menu is not.
    pub fn carried_from(key: ScopeKey, previous: &ConversationState) -> Self {
        let mut state = Self::new(key);
        state.handler_id = previous.handler_id.clone();
        state.data = previous.data.clone();
        state
    }

    pub fn key(&self) -> ScopeKey {
        ScopeKey::new(self.chat_id, self.user_id, self.message_id)
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Returns `true` if the record changed since it was loaded or saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag after a successful write.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.last_updated = Utc::now();
    }

    /// Returns `true` if a value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the raw encoded value stored under `key`.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Decodes the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> StateResult<Option<T>> {
        let Some(raw) = self.data.get(key) else {
            return Ok(None);
        };
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|source| StateError::Decode {
                key: key.to_string(),
                source,
            })
    }

    /// Encodes and stores `value` under `key`.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> StateResult<()> {
        let raw = serde_json::to_string(value).map_err(|source| StateError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.data.insert(key.to_string(), raw);
        self.touch();
        Ok(())
    }

    /// Removes the value under `key`, returning whether one was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.data.remove(key).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    /// Removes every stored value.
    pub fn clear(&mut self) {
        self.data.clear();
        self.touch();
    }

    pub fn set_handler(&mut self, handler_id: Option<String>) {
        self.handler_id = handler_id;
        self.touch();
    }

    pub fn set_sub_menu(&mut self, sub_menu: Option<String>) {
        self.sub_menu = sub_menu;
        self.touch();
    }

    /// Field-for-field equality, ignoring the in-memory flags.
    pub fn same_record(&self, other: &ConversationState) -> bool {
        self.key() == other.key()
            && self.handler_id == other.handler_id
            && self.sub_menu == other.sub_menu
            && self.data == other.data
            && self.last_updated == other.last_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cart {
        items: Vec<String>,
    }

    #[test]
    fn test_typed_round_trip() {
        let mut state = ConversationState::new(ScopeKey::new(1, Some(2), 3));
        assert!(!state.is_dirty());

        let cart = Cart {
            items: vec!["tea".into()],
        };
        state.set("cart", &cart).unwrap();
        state.set("count", &3u32).unwrap();

        assert!(state.is_dirty());
        assert_eq!(state.get::<Cart>("cart").unwrap(), Some(cart));
        assert_eq!(state.get::<u32>("count").unwrap(), Some(3));
        assert_eq!(state.get::<u32>("missing").unwrap(), None);
    }

    #[test]
    fn test_decode_error_names_key() {
        let mut state = ConversationState::new(ScopeKey::new(1, None, 1));
        state.set("name", "alice").unwrap();
        let err = state.get::<u32>("name").unwrap_err();
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn test_carry_forward_skips_sub_menu() {
        let mut previous = ConversationState::new(ScopeKey::new(5, Some(1), 10));
        previous.set("k", "v").unwrap();
        previous.set_handler(Some("test".into()));
        previous.set_sub_menu(Some("settings".into()));

        let next = ConversationState::carried_from(ScopeKey::new(5, Some(1), 12), &previous);
        assert_eq!(next.message_id, 12);
        assert_eq!(next.handler_id.as_deref(), Some("test"));
        assert_eq!(next.get::<String>("k").unwrap().as_deref(), Some("v"));
        assert_eq!(next.sub_menu, None);
        assert!(!next.is_dirty());
    }

    #[test]
    fn test_remove_only_dirties_on_change() {
        let mut state = ConversationState::new(ScopeKey::new(1, None, 1));
        assert!(!state.remove("nothing"));
        assert!(!state.is_dirty());
        state.set("a", &1).unwrap();
        state.mark_clean();
        assert!(state.remove("a"));
        assert!(state.is_dirty());
    }
}
