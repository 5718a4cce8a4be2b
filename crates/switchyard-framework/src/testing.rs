//! Test doubles shared by the unit tests of this crate.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use switchyard_core::{
    ApiError, ApiResult, BoxedPlatform, CallbackQuery, Chat, Keyboard, Message, Platform, Update,
    UpdateKind, User,
};

/// Records every outbound call. Sent messages get ids from 100 upwards;
/// every edit is rejected as "not modified".
#[derive(Default)]
pub(crate) struct RecordingPlatform {
    pub sent: Mutex<Vec<(i64, String, Option<Keyboard>)>>,
    pub edited: Mutex<Vec<(i64, String)>>,
    pub answered: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl RecordingPlatform {
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    fn id(&self) -> &str {
        "recording"
    }

    fn username(&self) -> Option<&str> {
        Some("yard_bot")
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> ApiResult<i64> {
        self.sent
            .lock()
            .push((chat_id, text.to_string(), keyboard.cloned()));
        Ok(100 + self.next_id.fetch_add(1, Ordering::SeqCst) as i64)
    }

    async fn edit_text(
        &self,
        _chat_id: i64,
        message_id: i64,
        text: &str,
        _keyboard: Option<&Keyboard>,
    ) -> ApiResult<()> {
        self.edited.lock().push((message_id, text.to_string()));
        Err(ApiError::Rejected {
            code: 400,
            description: "Bad Request: message is not modified".into(),
        })
    }

    async fn answer_callback(&self, callback_id: &str, _text: Option<&str>) -> ApiResult<()> {
        self.answered.lock().push(callback_id.to_string());
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub(crate) fn platform() -> (Arc<RecordingPlatform>, BoxedPlatform) {
    let platform = Arc::new(RecordingPlatform::default());
    let boxed: BoxedPlatform = platform.clone();
    (platform, boxed)
}

/// A private text message from user 7.
pub(crate) fn text(message_id: i64, text: &str) -> Update {
    Update::new(
        message_id,
        UpdateKind::Message(Message::text(
            message_id,
            Chat::private(7),
            Some(User::new(7)),
            text,
        )),
    )
}

/// A press by user 7 on message 100 of the private chat.
pub(crate) fn press(data: &str) -> Update {
    Update::new(
        50,
        UpdateKind::CallbackQuery(CallbackQuery {
            id: "cb-1".into(),
            from: User::new(7),
            message: Some(Message::text(100, Chat::private(7), None, "menu")),
            data: Some(data.into()),
        }),
    )
}
