//! Conversation screens of the console bot.
//!
//! `main` and `settings` are scoped entries: they only see updates while
//! they are the conversation's active handler. `global` commands work from
//! any screen.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchyard::core::MessageKind;
use switchyard::framework::{
    Arg, CommandBindError, CommandErrorHandler, CommandInfo, CustomMapper, MapError, ParamType,
};
use switchyard::prelude::*;
use tracing::warn;

pub const HELP: &str = "\
Commands:
  /start              open the main menu
  /add <a> <b> [c]    add numbers
  /theme <light|dark> pick a theme
  repeat <n> <word>   say a word n times
  /help               this text";

// ============================================================================
// Custom argument type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

/// Maps `light` and `dark` to [`Theme`] arguments.
pub struct ThemeMapper;

impl CustomMapper for ThemeMapper {
    fn types(&self) -> &[&'static str] {
        &["theme"]
    }

    fn map(&self, ty: &ParamType, value: &str) -> Result<Arg, MapError> {
        let value = value.to_lowercase();
        match value.as_str() {
            "light" | "dark" => Ok(Arg::Custom(serde_json::Value::String(value))),
            _ => Err(MapError::parse(ty.name(), value, "expected light or dark")),
        }
    }
}

/// Answers malformed commands with their usage line.
pub struct UsageReply;

#[async_trait]
impl CommandErrorHandler for UsageReply {
    async fn handle(&self, ctx: &HandlerContext, error: &CommandBindError, command: &CommandInfo) {
        let text = format!("{error}\nusage: {}", command.help());
        if let Err(e) = ctx.reply(text).await {
            warn!(error = %e, "Failed to send usage");
        }
    }
}

// ============================================================================
// global
// ============================================================================

pub fn global() -> HandlerEntry {
    HandlerEntry::new("global")
        .method(Method::new("start", start).when(Condition::command("start")))
        .method(Method::new("help", help).when(Condition::command("help")))
        .method(
            Method::new("add", add)
                .when(Condition::command("add"))
                .param(Param::of::<i64>("a"))
                .param(Param::of::<i64>("b"))
                .param(Param::of::<Option<i64>>("c")),
        )
        .method(
            Method::new("theme", theme)
                .when(Condition::command("theme"))
                .param(Param::custom("theme", "theme").describe("light or dark")),
        )
        .method(
            Method::new("repeat", repeat)
                .when(Condition::text(Selector::capture(r"^repeat (\d+) (\S+)$")))
                .param(Param::of::<u8>("n"))
                .param(Param::of::<String>("word")),
        )
        .method(
            Method::new("photo", photo)
                .when(Condition::private())
                .when(Condition::kind(MessageKind::Photo)),
        )
}

async fn start(ctx: HandlerContext) -> anyhow::Result<()> {
    ctx.change_handler(Some("main"), true).await?;
    Ok(())
}

async fn help() -> &'static str {
    HELP
}

async fn add(Params((a, b, c)): Params<(i64, i64, Option<i64>)>) -> String {
    match c {
        Some(c) => format!("{a} + {b} + {c} = {}", a + b + c),
        None => format!("{a} + {b} = {}", a + b),
    }
}

async fn theme(ctx: HandlerContext, args: Args) -> anyhow::Result<String> {
    let theme: Theme = args.custom(0)?;
    ctx.set_state("theme", &theme)?;
    Ok(format!("Theme set to {theme:?}"))
}

async fn repeat(Params((n, word)): Params<(u8, String)>) -> String {
    vec![word; usize::from(n.min(10))].join(" ")
}

async fn photo() -> &'static str {
    "Nice picture!"
}

// ============================================================================
// main
// ============================================================================

pub fn main_menu() -> HandlerEntry {
    HandlerEntry::new("main")
        .private_only()
        .when(Condition::private())
        .method(Method::new("menu", menu).as_default())
        .method(Method::new("counter", counter).when(Condition::text("Counter")))
        .method(Method::new("settings", open_settings).when(Condition::text("Settings\n")))
}

async fn menu(ctx: HandlerContext) -> Reply {
    Reply::text("Main menu").keyboard(ctx.reply_keyboard())
}

async fn counter(ctx: HandlerContext) -> anyhow::Result<String> {
    let count = ctx.get_state::<u32>("count")?.unwrap_or(0) + 1;
    ctx.set_state("count", &count)?;
    Ok(format!("Pressed {count} time(s)"))
}

async fn open_settings(ctx: HandlerContext) -> anyhow::Result<()> {
    ctx.change_handler(Some("settings"), true).await?;
    Ok(())
}

// ============================================================================
// settings
// ============================================================================

pub fn settings() -> HandlerEntry {
    HandlerEntry::new("settings")
        .private_only()
        .when(Condition::private())
        .method(Method::new("show", show_settings).as_default())
        .method(
            Method::new("english", set_language)
                .when(Condition::labeled_button("lang:en", "English")),
        )
        .method(
            Method::new("german", set_language)
                .when(Condition::labeled_button("lang:de", "Deutsch\n")),
        )
        .method(Method::new("back", back).when(Condition::labeled_button("back", "« Back")))
}

async fn show_settings(ctx: HandlerContext) -> anyhow::Result<Reply> {
    let language = ctx
        .get_state::<String>("language")?
        .unwrap_or_else(|| "en".to_string());
    Ok(Reply::text(format!("Settings\nlanguage: {language}"))
        .keyboard(ctx.inline_keyboard())
        .edit())
}

async fn set_language(ctx: HandlerContext, CallbackData(data): CallbackData) -> anyhow::Result<()> {
    let language = data.trim_start_matches("lang:");
    ctx.set_state("language", language)?;
    ctx.edit(
        format!("Settings\nlanguage: {language}"),
        Some(&ctx.inline_keyboard()),
    )
    .await?;
    Ok(())
}

async fn back(ctx: HandlerContext) -> anyhow::Result<()> {
    ctx.change_handler(Some("main"), true).await?;
    Ok(())
}
