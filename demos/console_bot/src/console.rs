//! Console transport: stdin in, stdout out.
//!
//! Input lines:
//!
//! ```text
//! hello               text message in the private chat
//! /add 2 3            commands are plain text too
//! !press <data>       press a button on the last inline keyboard
//! !group <text>       text message in a group chat
//! !photo              a photo without caption
//! {"id": 1, ...}      a raw update as JSON
//! ```

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::Mutex;
use switchyard::core::{
    ApiResult, CallbackQuery, Chat, Keyboard, Message, MessageKind, Platform, Update, UpdateKind,
    User,
};
use switchyard::prelude::{BoxedPlatform, UpdateSource};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

pub const GROUP_CHAT_ID: i64 = -100;

/// Prints outbound messages and numbers them like a real chat would.
pub struct ConsolePlatform {
    username: String,
    next_message_id: AtomicI64,
    /// Last message that carried an inline keyboard, per chat.
    inline_targets: Mutex<Vec<(i64, i64)>>,
}

impl ConsolePlatform {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            next_message_id: AtomicI64::new(1),
            inline_targets: Mutex::new(Vec::new()),
        }
    }

    fn next_message_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    fn remember_inline(&self, chat_id: i64, message_id: i64) {
        let mut targets = self.inline_targets.lock();
        targets.retain(|(chat, _)| *chat != chat_id);
        targets.push((chat_id, message_id));
    }

    fn inline_target(&self, chat_id: i64) -> Option<i64> {
        self.inline_targets
            .lock()
            .iter()
            .find(|(chat, _)| *chat == chat_id)
            .map(|(_, message)| *message)
    }

    fn print(&self, chat_id: i64, message_id: i64, text: &str, keyboard: Option<&Keyboard>) {
        println!("[{}] {chat_id}#{message_id}: {text}", self.username);
        match keyboard {
            Some(Keyboard::Reply { rows }) => {
                for row in rows {
                    let row: Vec<_> = row.iter().map(|label| format!("[{label}]")).collect();
                    println!("    {}", row.join(" "));
                }
            }
            Some(Keyboard::Inline { rows }) => {
                for row in rows {
                    let row: Vec<_> = row
                        .iter()
                        .map(|button| format!("<{} = {}>", button.text, button.data))
                        .collect();
                    println!("    {}", row.join(" "));
                }
                self.remember_inline(chat_id, message_id);
            }
            Some(Keyboard::Remove) | None => {}
        }
    }
}

#[async_trait]
impl Platform for ConsolePlatform {
    fn id(&self) -> &str {
        "console"
    }

    fn username(&self) -> Option<&str> {
        Some(&self.username)
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> ApiResult<i64> {
        let message_id = self.next_message_id();
        self.print(chat_id, message_id, text, keyboard);
        Ok(message_id)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> ApiResult<()> {
        print!("(edited) ");
        self.print(chat_id, message_id, text, keyboard);
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> ApiResult<()> {
        if let Some(text) = text {
            println!("[{}] ({callback_id}) {text}", self.username);
        }
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Reads updates from stdin, speaking as one user.
pub struct ConsoleSource {
    platform: Arc<ConsolePlatform>,
    lines: Lines<BufReader<Stdin>>,
    user: User,
    next_update_id: i64,
}

impl ConsoleSource {
    pub fn new(platform: Arc<ConsolePlatform>, user_id: i64) -> Self {
        Self {
            platform,
            lines: BufReader::new(tokio::io::stdin()).lines(),
            user: User::new(user_id),
            next_update_id: 1,
        }
    }

    fn message(&self, chat: Chat, kind: MessageKind, text: Option<&str>) -> Message {
        Message {
            message_id: self.platform.next_message_id(),
            chat,
            from: Some(self.user.clone()),
            kind,
            text: text.map(str::to_string),
        }
    }

    fn parse(&self, update_id: i64, line: &str) -> anyhow::Result<Update> {
        if line.starts_with('{') {
            return serde_json::from_str(line).context("invalid update JSON");
        }

        let private = Chat::private(self.user.id);
        let kind = if let Some(data) = line.strip_prefix("!press ") {
            let message_id = self
                .platform
                .inline_target(private.id)
                .context("no inline keyboard to press")?;
            UpdateKind::CallbackQuery(CallbackQuery {
                id: format!("cb{update_id}"),
                from: self.user.clone(),
                message: Some(Message {
                    message_id,
                    chat: private,
                    from: None,
                    kind: MessageKind::Text,
                    text: None,
                }),
                data: Some(data.trim().to_string()),
            })
        } else if let Some(text) = line.strip_prefix("!group ") {
            UpdateKind::Message(self.message(Chat::group(GROUP_CHAT_ID), MessageKind::Text, Some(text)))
        } else if line == "!photo" {
            UpdateKind::Message(self.message(private, MessageKind::Photo, None))
        } else {
            UpdateKind::Message(self.message(private, MessageKind::Text, Some(line)))
        };
        Ok(Update::new(update_id, kind))
    }
}

#[async_trait]
impl UpdateSource for ConsoleSource {
    fn platform(&self) -> BoxedPlatform {
        self.platform.clone()
    }

    async fn next_update(&mut self) -> anyhow::Result<Option<Update>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let update_id = self.next_update_id;
            self.next_update_id += 1;
            return self.parse(update_id, line).map(Some);
        }
    }
}
