//! Conversation state storage.
//!
//! A [`StateStore`] persists [`ConversationState`] records by their
//! [`ScopeKey`]. Backends implement three primitives (`find`, `find_latest`,
//! `upsert`); the carry-forward lookup used by the dispatcher is provided on
//! top of them:
//!
//! 1. An exact record for the event's key is returned as is.
//! 2. Otherwise the most recent record in the same chat (and user) with a
//!    message id not greater than the event's is continued: its handler id
//!    and data bag are copied into a new record for the exact key.
//! 3. Otherwise a fresh empty record is created.
//!
//! Records built in steps 2 and 3 are not written until [`StateStore::upsert`]
//! is called.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::error::StoreResult;
use crate::event::Update;
use crate::state::{ConversationState, ScopeKey};

/// Durable mapping from conversation scope to state record.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Returns the record stored at exactly `key`.
    async fn find(&self, key: &ScopeKey) -> StoreResult<Option<ConversationState>>;

    /// Returns the record in the same chat and user as `key` with the highest
    /// message id not greater than `key.message_id`.
    async fn find_latest(&self, key: &ScopeKey) -> StoreResult<Option<ConversationState>>;

    /// Replaces the record at the state's own key, creating it if missing.
    async fn upsert(&self, state: &ConversationState) -> StoreResult<()>;

    /// Resolves the state for an update, carrying forward the previous record
    /// of the conversation when there is no exact one.
    ///
    /// Updates without a chat/message scope get a detached record.
    async fn state_for_event(&self, update: &Update) -> StoreResult<ConversationState> {
        match update.scope_key() {
            Some(key) => self.state_for_key(key).await,
            None => Ok(ConversationState::detached(update.user_id())),
        }
    }

    /// Resolves the state for `key` with carry-forward.
    async fn state_for_key(&self, key: ScopeKey) -> StoreResult<ConversationState> {
        if let Some(existing) = self.find(&key).await? {
            return Ok(existing);
        }
        match self.find_latest(&key).await? {
            Some(previous) => {
                trace!(%key, from = previous.message_id, "Carrying state forward");
                Ok(ConversationState::carried_from(key, &previous))
            }
            None => Ok(ConversationState::new(key)),
        }
    }

    /// Returns the record attached to a message regardless of user, or a fresh
    /// one. Used for state bound to a message the bot itself sent.
    async fn state_for_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> StoreResult<ConversationState> {
        let key = ScopeKey::new(chat_id, None, message_id);
        Ok(self
            .find(&key)
            .await?
            .unwrap_or_else(|| ConversationState::new(key)))
    }
}

/// A shared state store trait object.
pub type BoxedStateStore = Arc<dyn StateStore>;

/// In-process [`StateStore`] backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<BTreeMap<ScopeKey, ConversationState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn find(&self, key: &ScopeKey) -> StoreResult<Option<ConversationState>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn find_latest(&self, key: &ScopeKey) -> StoreResult<Option<ConversationState>> {
        let lower = ScopeKey::new(key.chat_id, key.user_id, i64::MIN);
        Ok(self
            .records
            .read()
            .range(lower..=*key)
            .next_back()
            .map(|(_, state)| state.clone()))
    }

    async fn upsert(&self, state: &ConversationState) -> StoreResult<()> {
        let mut stored = state.clone();
        stored.mark_clean();
        self.records.write().insert(state.key(), stored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Chat, Message, UpdateKind, User};

    fn text_update(chat: i64, user: i64, message: i64) -> Update {
        Update::new(
            message,
            UpdateKind::Message(Message::text(
                message,
                Chat::private(chat),
                Some(User::new(user)),
                "hello",
            )),
        )
    }

    #[tokio::test]
    async fn test_carry_forward_from_earlier_message() {
        let store = MemoryStateStore::new();
        let mut previous = ConversationState::new(ScopeKey::new(100, Some(1), 10));
        previous.set("k", "v").unwrap();
        previous.set_sub_menu(Some("deep".into()));
        store.upsert(&previous).await.unwrap();

        let state = store.state_for_event(&text_update(100, 1, 12)).await.unwrap();

        assert_eq!(state.message_id, 12);
        assert_eq!(state.get::<String>("k").unwrap().as_deref(), Some("v"));
        assert_eq!(state.sub_menu, None);
        // Not persisted until upsert.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_carry_forward_ignores_later_messages_and_other_users() {
        let store = MemoryStateStore::new();
        let mut later = ConversationState::new(ScopeKey::new(100, Some(1), 20));
        later.set("k", "later").unwrap();
        store.upsert(&later).await.unwrap();
        let mut other = ConversationState::new(ScopeKey::new(100, Some(2), 5));
        other.set("k", "other").unwrap();
        store.upsert(&other).await.unwrap();

        let state = store.state_for_event(&text_update(100, 1, 12)).await.unwrap();
        assert!(state.data.is_empty());
    }

    #[tokio::test]
    async fn test_carry_forward_is_idempotent() {
        let store = MemoryStateStore::new();
        let mut previous = ConversationState::new(ScopeKey::new(7, Some(1), 1));
        previous.set_handler(Some("test".into()));
        previous.set("step", &2).unwrap();
        store.upsert(&previous).await.unwrap();

        let update = text_update(7, 1, 4);
        let first = store.state_for_event(&update).await.unwrap();
        let second = store.state_for_event(&update).await.unwrap();

        assert_eq!(first.key(), second.key());
        assert_eq!(first.handler_id, second.handler_id);
        assert_eq!(first.data, second.data);
    }

    #[tokio::test]
    async fn test_upsert_round_trip() {
        let store = MemoryStateStore::new();
        let mut state = ConversationState::new(ScopeKey::new(3, Some(9), 30));
        state.set_handler(Some("main".into()));
        state.set_sub_menu(Some("page-2".into()));
        state.set("items", &vec![1, 2, 3]).unwrap();

        store.upsert(&state).await.unwrap();
        store.upsert(&state).await.unwrap();

        let loaded = store.state_for_event(&text_update(3, 9, 30)).await.unwrap();
        assert!(loaded.same_record(&state));
        assert!(!loaded.is_dirty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_state_for_message_has_no_user() {
        let store = MemoryStateStore::new();
        let state = store.state_for_message(3, 44).await.unwrap();
        assert_eq!(state.key(), ScopeKey::new(3, None, 44));
        tokio_test::assert_ok!(store.upsert(&state).await);
        let again = store.state_for_message(3, 44).await.unwrap();
        assert!(again.same_record(&state));
    }
}
