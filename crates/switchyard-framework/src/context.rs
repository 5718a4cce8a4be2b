//! Per-invocation handler context.
//!
//! A [`HandlerContext`] is handed to every method. It carries the update, the
//! platform client and the conversation state, and offers the operations a
//! conversation step needs: reading and writing state, replying, editing,
//! switching the active handler and generating menus.
//!
//! The state lives behind a mutex shared by every context of one dispatch, so
//! a default method started by [`HandlerContext::change_handler`] sees the
//! caller's changes. The lock is never held across an await point.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use switchyard_core::{
    ApiError, BoxedPlatform, BoxedStateStore, ConversationState, Keyboard, ScopeKey, StateResult,
    Update,
};
use tracing::{debug, trace};

use crate::condition::{Condition, MatchContext};
use crate::dispatcher::Engine;
use crate::entry::HandlerEntry;
use crate::error::{DispatchError, DispatchResult};
use crate::router::Route;

/// Context handed to a method.
#[derive(Clone)]
pub struct HandlerContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    update: Arc<Update>,
    platform: BoxedPlatform,
    state: Arc<Mutex<ConversationState>>,
    engine: Arc<Engine>,
    entry: usize,
}

impl HandlerContext {
    pub(crate) fn new(
        update: Arc<Update>,
        platform: BoxedPlatform,
        state: Arc<Mutex<ConversationState>>,
        engine: Arc<Engine>,
        entry: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                update,
                platform,
                state,
                engine,
                entry,
            }),
        }
    }

    // =========================================================================
    // Update accessors
    // =========================================================================

    pub fn update(&self) -> &Update {
        &self.inner.update
    }

    pub fn platform(&self) -> &BoxedPlatform {
        &self.inner.platform
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.inner.update.chat_id()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.inner.update.user_id()
    }

    pub fn message_id(&self) -> Option<i64> {
        self.inner.update.message_id()
    }

    pub fn text(&self) -> Option<&str> {
        self.inner.update.text()
    }

    pub fn callback_data(&self) -> Option<&str> {
        self.inner.update.callback_data()
    }

    /// The entry the running method belongs to.
    pub fn entry(&self) -> &HandlerEntry {
        &self.inner.engine.router.entries()[self.inner.entry]
    }

    fn store(&self) -> &BoxedStateStore {
        &self.inner.engine.store
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Runs `f` with exclusive access to the conversation state.
    ///
    /// The state lock is held while `f` runs and is not reentrant: calling
    /// any state accessor of this context (or a clone of it) from inside `f`
    /// deadlocks. Work on the `&mut ConversationState` argument instead.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ConversationState) -> R) -> R {
        f(&mut self.inner.state.lock())
    }

    /// Returns a copy of the conversation state.
    pub fn state_snapshot(&self) -> ConversationState {
        self.inner.state.lock().clone()
    }

    pub fn get_state<T: DeserializeOwned>(&self, key: &str) -> StateResult<Option<T>> {
        self.inner.state.lock().get(key)
    }

    pub fn set_state<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StateResult<()> {
        self.inner.state.lock().set(key, value)
    }

    pub fn remove_state(&self, key: &str) -> bool {
        self.inner.state.lock().remove(key)
    }

    pub fn clear_state(&self) {
        self.inner.state.lock().clear();
    }

    pub fn set_sub_menu(&self, sub_menu: Option<&str>) {
        self.inner
            .state
            .lock()
            .set_sub_menu(sub_menu.map(str::to_string));
    }

    pub fn sub_menu(&self) -> Option<String> {
        self.inner.state.lock().sub_menu.clone()
    }

    pub fn handler_id(&self) -> Option<String> {
        self.inner.state.lock().handler_id.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().is_dirty()
    }

    /// Persists the conversation state.
    ///
    /// Detached states are never persisted.
    pub async fn save_state(&self) -> DispatchResult<()> {
        let snapshot = {
            let state = self.inner.state.lock();
            if state.is_detached() {
                return Ok(());
            }
            state.clone()
        };
        self.store().upsert(&snapshot).await?;

        let mut state = self.inner.state.lock();
        if state.same_record(&snapshot) {
            state.mark_clean();
        }
        Ok(())
    }

    /// Copies the active handler and data onto the record of a freshly sent
    /// message, persists it, and continues with that record.
    pub async fn attach_state(&self, message_id: i64) -> DispatchResult<()> {
        let Some(chat_id) = self.chat_id() else {
            return Ok(());
        };
        let mut record = match self.user_id() {
            Some(user_id) => {
                let key = ScopeKey::new(chat_id, Some(user_id), message_id);
                self.store()
                    .find(&key)
                    .await?
                    .unwrap_or_else(|| ConversationState::new(key))
            }
            None => self.store().state_for_message(chat_id, message_id).await?,
        };

        let (handler_id, data) =
            self.with_state(|state| (state.handler_id.clone(), state.data.clone()));
        record.set_handler(handler_id);
        record.data = data;
        self.store().upsert(&record).await?;
        record.mark_clean();

        trace!(key = %record.key(), "Attached state to sent message");
        *self.inner.state.lock() = record;
        Ok(())
    }

    /// Switches the conversation's active handler.
    ///
    /// `None` selects the first global entry, or the first scoped entry if
    /// every entry has a scope id. The state is reloaded from the store,
    /// re-pointed and saved; unsaved changes made by the caller are dropped.
    /// With `run_default`, the target entry's matching default method runs
    /// immediately.
    pub async fn change_handler(&self, id: Option<&str>, run_default: bool) -> DispatchResult<()> {
        let engine = Arc::clone(&self.inner.engine);
        let entries = engine.router.entries();
        let target = entries
            .iter()
            .position(|entry| entry.scope_id() == id)
            .or_else(|| match id {
                None => engine.router.first_scoped(),
                Some(_) => None,
            })
            .ok_or_else(|| DispatchError::UnknownHandler(id.unwrap_or("<global>").to_string()))?;

        let mut fresh = engine.store.state_for_event(self.update()).await?;
        fresh.set_handler(id.map(str::to_string));
        *self.inner.state.lock() = fresh;
        self.save_state().await?;
        debug!(handler = ?id, "Changed active handler");

        if !run_default {
            return Ok(());
        }

        let entry = &entries[target];
        let method = {
            let state = self.state_snapshot();
            let cx = MatchContext {
                update: self.update(),
                state: &state,
                bot_username: engine.bot_username(self.platform()),
            };
            entry.find_default(&cx)
        };
        let Some(method) = method else {
            if entry.is_private_only() {
                return Err(DispatchError::MissingDefault(
                    entry.scope_id().unwrap_or(entry.name()).to_string(),
                ));
            }
            return Ok(());
        };

        let ctx = HandlerContext::new(
            Arc::clone(&self.inner.update),
            Arc::clone(&self.inner.platform),
            Arc::clone(&self.inner.state),
            Arc::clone(&engine),
            target,
        );
        engine
            .run_method(ctx, Route {
                entry: target,
                method,
            })
            .await
            .map(|_| ())
    }

    // =========================================================================
    // Platform calls
    // =========================================================================

    /// Sends a text message to the update's chat.
    ///
    /// The conversation continues on the sent message: the state is attached
    /// to it and saved. Returns the new message id.
    pub async fn reply(&self, text: impl Into<String> + Send) -> DispatchResult<i64> {
        self.reply_with(text, None).await
    }

    /// Like [`reply`](Self::reply), with a keyboard.
    pub async fn reply_with(
        &self,
        text: impl Into<String> + Send,
        keyboard: Option<&Keyboard>,
    ) -> DispatchResult<i64> {
        let chat_id = self.chat_id().ok_or(ApiError::MissingTarget("chat"))?;
        let text = text.into();
        let message_id = self.platform().send_text(chat_id, &text, keyboard).await?;
        self.attach_state(message_id).await?;
        Ok(message_id)
    }

    /// Edits the message the update belongs to and saves the state.
    ///
    /// A "message is not modified" rejection is not an error.
    pub async fn edit(
        &self,
        text: impl Into<String> + Send,
        keyboard: Option<&Keyboard>,
    ) -> DispatchResult<()> {
        let chat_id = self.chat_id().ok_or(ApiError::MissingTarget("chat"))?;
        let message_id = self
            .message_id()
            .ok_or(ApiError::MissingTarget("message"))?;
        let text = text.into();
        match self
            .platform()
            .edit_text(chat_id, message_id, &text, keyboard)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_modified() => trace!(message_id, "Message not modified"),
            Err(e) => return Err(e.into()),
        }
        self.save_state().await
    }

    /// Edits the message for button presses, sends a new one otherwise.
    pub async fn edit_or_send(
        &self,
        text: impl Into<String> + Send,
        keyboard: Option<&Keyboard>,
    ) -> DispatchResult<()> {
        if self.update().is_callback() {
            self.edit(text, keyboard).await
        } else {
            self.reply_with(text, keyboard).await.map(|_| ())
        }
    }

    /// Acknowledges the button press, optionally with a notification text.
    pub async fn answer_callback(&self, text: Option<&str>) -> DispatchResult<()> {
        let id = self
            .update()
            .callback_id()
            .ok_or(ApiError::MissingTarget("callback"))?;
        self.platform().answer_callback(id, text).await?;
        Ok(())
    }

    // =========================================================================
    // Menus
    // =========================================================================

    /// Builds a reply keyboard from the visible text buttons of the current
    /// entry.
    pub fn reply_keyboard(&self) -> Keyboard {
        let labels = self.menu(
            |condition| matches!(condition, Condition::Text { .. }),
            |condition| condition.reply_label().map(str::to_string),
        );
        Keyboard::reply(labels)
    }

    /// Builds an inline keyboard from the visible buttons of the current
    /// entry.
    pub fn inline_keyboard(&self) -> Keyboard {
        let buttons = self.menu(
            |condition| matches!(condition, Condition::Button { .. }),
            Condition::inline_button,
        );
        Keyboard::inline(buttons)
    }

    /// Collects one item per method from its first condition of the wanted
    /// kind, skipping methods whose other conditions do not match.
    fn menu<T>(
        &self,
        wanted: impl Fn(&Condition) -> bool,
        item: impl Fn(&Condition) -> Option<T>,
    ) -> Vec<T> {
        let state = self.state_snapshot();
        let cx = MatchContext {
            update: self.update(),
            state: &state,
            bot_username: self.inner.engine.bot_username(self.platform()),
        };

        self.entry()
            .methods()
            .iter()
            .filter_map(|method| {
                let conditions = method.conditions();
                let idx = conditions.iter().position(&wanted)?;
                let value = item(&conditions[idx])?;
                conditions
                    .iter()
                    .enumerate()
                    .all(|(i, condition)| i == idx || wanted(condition) || condition.matches(&cx))
                    .then_some(value)
            })
            .collect()
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("update", &self.inner.update)
            .field("platform", &self.inner.platform.id())
            .field("entry", &self.entry().name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::{Chat, Message, StateStore, UpdateKind};
    use tokio_test::assert_ok;

    use crate::dispatcher::Dispatcher;
    use crate::entry::Method;
    use crate::testing::{platform, press, text};

    async fn noop() {}

    async fn main_menu() -> &'static str {
        "main menu"
    }

    async fn global_menu() -> &'static str {
        "global menu"
    }

    fn dispatcher(entries: Vec<HandlerEntry>) -> Dispatcher {
        entries
            .into_iter()
            .fold(Dispatcher::builder(), |builder, entry| builder.register(entry))
            .build()
            .unwrap()
    }

    fn context(
        dispatcher: &Dispatcher,
        update: Update,
        platform: BoxedPlatform,
        state: ConversationState,
        entry: usize,
    ) -> HandlerContext {
        HandlerContext::new(
            Arc::new(update),
            platform,
            Arc::new(Mutex::new(state)),
            Arc::clone(&dispatcher.engine),
            entry,
        )
    }

    fn state_with_handler(update: &Update, handler: Option<&str>) -> ConversationState {
        let mut state = ConversationState::new(update.scope_key().unwrap());
        state.set_handler(handler.map(str::to_string));
        state
    }

    #[tokio::test]
    async fn test_change_to_unknown_handler_fails() {
        let dispatcher = dispatcher(vec![
            HandlerEntry::new("global").method(Method::new("menu", noop).as_default()),
        ]);
        let (recorder, platform) = platform();
        let update = text(1, "hi");
        let ctx = context(&dispatcher, update.clone(), platform, state_with_handler(&update, None), 0);

        let err = ctx.change_handler(Some("missing"), true).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownHandler(id) if id == "missing"));
        assert!(recorder.texts().is_empty());
    }

    #[tokio::test]
    async fn test_change_to_global_runs_global_default() {
        let dispatcher = dispatcher(vec![
            HandlerEntry::new("main")
                .scoped("main")
                .private_only()
                .method(Method::new("menu", main_menu).as_default()),
            HandlerEntry::new("global")
                .private_only()
                .method(Method::new("menu", global_menu).as_default()),
        ]);
        let (recorder, platform) = platform();
        let update = text(1, "back");
        let ctx = context(
            &dispatcher,
            update.clone(),
            platform,
            state_with_handler(&update, Some("main")),
            0,
        );

        assert_ok!(ctx.change_handler(None, true).await);
        assert_eq!(recorder.texts(), vec!["global menu"]);
        assert_eq!(ctx.handler_id(), None);

        let saved = dispatcher
            .store()
            .find(&ScopeKey::new(7, Some(7), 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.handler_id, None);
    }

    #[tokio::test]
    async fn test_change_to_global_without_global_entry_uses_first_scoped() {
        let dispatcher = dispatcher(vec![
            HandlerEntry::new("a")
                .scoped("a")
                .private_only()
                .method(Method::new("menu", main_menu).as_default()),
            HandlerEntry::new("b")
                .scoped("b")
                .private_only()
                .method(Method::new("menu", global_menu).as_default()),
        ]);
        let (recorder, platform) = platform();
        let update = text(1, "back");
        let ctx = context(
            &dispatcher,
            update.clone(),
            platform,
            state_with_handler(&update, Some("b")),
            1,
        );

        assert_ok!(ctx.change_handler(None, true).await);
        assert_eq!(recorder.texts(), vec!["main menu"]);
    }

    #[tokio::test]
    async fn test_missing_default_on_private_entry() {
        let dispatcher = dispatcher(vec![
            HandlerEntry::new("global").method(Method::new("menu", noop).as_default()),
            HandlerEntry::new("bare")
                .scoped("bare")
                .private_only()
                .method(Method::new("only", noop).when(Condition::text("x"))),
            HandlerEntry::new("quiet")
                .scoped("quiet")
                .method(Method::new("only", noop).when(Condition::text("x"))),
        ]);
        let (_, platform) = platform();
        let update = text(1, "go");
        let ctx = context(&dispatcher, update.clone(), platform, state_with_handler(&update, None), 0);

        let err = ctx.change_handler(Some("bare"), true).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingDefault(id) if id == "bare"));

        // Entries that are not private-only simply have nothing to run.
        assert_ok!(ctx.change_handler(Some("quiet"), true).await);
        assert_eq!(ctx.handler_id().as_deref(), Some("quiet"));
    }

    #[tokio::test]
    async fn test_attach_state_without_user_keys_by_message() {
        let dispatcher = dispatcher(vec![HandlerEntry::new("global")]);
        let (_, platform) = platform();
        let update = Update::new(
            3,
            UpdateKind::Message(Message::text(4, Chat::group(-5), None, "hi")),
        );
        let mut state = state_with_handler(&update, Some("main"));
        state.set("step", &2).unwrap();
        let ctx = context(&dispatcher, update, platform, state, 0);

        assert_ok!(ctx.attach_state(300).await);

        let attached = dispatcher
            .store()
            .find(&ScopeKey::new(-5, None, 300))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attached.handler_id.as_deref(), Some("main"));
        assert_eq!(attached.get::<i64>("step").unwrap(), Some(2));

        let current = ctx.state_snapshot();
        assert_eq!(current.message_id, 300);
        assert!(!current.is_dirty());
    }

    #[tokio::test]
    async fn test_inline_keyboard_skips_unmatched_methods() {
        let dispatcher = dispatcher(vec![
            HandlerEntry::new("settings")
                .method(Method::new("en", noop).when(Condition::labeled_button("lang:en", "English\n")))
                .method(Method::new("de", noop).when(Condition::labeled_button("lang:de", "Deutsch")))
                .method(
                    Method::new("admin", noop)
                        .when(Condition::labeled_button("admin", "Admin"))
                        .when(Condition::group()),
                )
                .method(
                    Method::new("reset", noop)
                        .when(Condition::labeled_button("reset", "Reset"))
                        .when(Condition::state("step", "done")),
                )
                .method(Method::new("secret", noop).when(Condition::button("secret").hidden()))
                .method(Method::new("back", noop).when(Condition::text("Back"))),
        ]);
        let (_, platform) = platform();
        let update = press("lang:en");
        let mut state = ConversationState::new(update.scope_key().unwrap());
        state.set("step", "started").unwrap();
        let ctx = context(&dispatcher, update, platform, state, 0);

        let button = |text: &str, data: &str| switchyard_core::InlineButton {
            text: text.to_string(),
            data: data.to_string(),
        };
        assert_eq!(
            ctx.inline_keyboard(),
            Keyboard::Inline {
                rows: vec![
                    vec![button("English", "lang:en")],
                    vec![button("Deutsch", "lang:de")],
                ],
            }
        );
        assert_eq!(ctx.reply_keyboard(), Keyboard::Reply { rows: vec![vec!["Back".to_string()]] });

        ctx.set_state("step", "done").unwrap();
        let Keyboard::Inline { rows } = ctx.inline_keyboard() else {
            panic!("expected an inline keyboard");
        };
        assert_eq!(rows[1], vec![button("Deutsch", "lang:de"), button("Reset", "reset")]);
    }

    #[tokio::test]
    async fn test_edit_tolerates_not_modified() {
        let dispatcher = dispatcher(vec![HandlerEntry::new("global")]);
        let (recorder, platform) = platform();
        let update = press("ok");
        let mut state = ConversationState::new(update.scope_key().unwrap());
        state.set("seen", &true).unwrap();
        let ctx = context(&dispatcher, update, platform, state, 0);

        assert_ok!(ctx.edit_or_send("Updated", None).await);
        assert_eq!(*recorder.edited.lock(), vec![(100, "Updated".to_string())]);
        assert!(recorder.texts().is_empty());

        // The state is still saved after a tolerated rejection.
        let saved = dispatcher
            .store()
            .find(&ScopeKey::new(7, Some(7), 100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.get::<bool>("seen").unwrap(), Some(true));
    }

    #[test]
    fn test_with_state_mutates_shared_state() {
        let dispatcher = dispatcher(vec![HandlerEntry::new("global")]);
        let (_, platform) = platform();
        let update = text(1, "hi");
        let ctx = context(&dispatcher, update.clone(), platform, state_with_handler(&update, None), 0);
        let clone = ctx.clone();

        ctx.with_state(|state| state.set_sub_menu(Some("colors".into())));
        assert_eq!(clone.sub_menu().as_deref(), Some("colors"));
    }
}
