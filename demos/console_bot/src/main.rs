//! Console Bot
//!
//! An interactive bot that talks over stdin/stdout, showing the conversation
//! features of Switchyard:
//!
//! - `/start` switches the conversation to the `main` screen
//! - the `main` screen builds its reply keyboard from its own methods
//! - `Settings` switches to the `settings` screen with an inline keyboard
//! - the active screen follows the conversation from message to message
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot
//! cargo run --package console-bot -- --config demos/console_bot/switchyard.toml --user 42
//! ```

mod console;
mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use switchyard::prelude::*;
use switchyard::runtime::{LogOutput, LoggingConfig};
use tracing::info;

use crate::console::{ConsolePlatform, ConsoleSource};

#[derive(Debug, Parser)]
#[command(name = "console-bot", about = "Chat with a Switchyard bot on the console")]
struct Cli {
    /// Configuration file; `switchyard.toml` is searched for when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production, ...).
    #[arg(short, long)]
    profile: Option<String>,

    /// User id the console speaks as.
    #[arg(short, long, default_value_t = 1)]
    user: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr unless configured otherwise; stdout is the chat.
    let defaults = SwitchyardConfig {
        logging: LoggingConfig {
            output: LogOutput::Stderr,
            ..Default::default()
        },
        ..Default::default()
    };

    let mut builder = SwitchyardRuntime::builder().merge(defaults);
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile);
    }

    // Unmatched updates are answered by the first eligible entry, so the
    // screens go before the global commands.
    let runtime = builder
        .register_as("main", handlers::main_menu())
        .register_as("settings", handlers::settings())
        .register(handlers::global())
        .on_command_error(handlers::UsageReply)
        .map_type(handlers::ThemeMapper)?
        .build()?;

    let username = runtime
        .config()
        .dispatch
        .bot_username
        .clone()
        .unwrap_or_else(|| "yard_bot".to_string());
    let platform = Arc::new(ConsolePlatform::new(username));
    let source = ConsoleSource::new(platform, cli.user);

    println!("{}", handlers::HELP);
    println!("Type !press <data> to press an inline button. Ctrl+D quits.\n");

    let stats = runtime.run(source).await?;
    info!(?stats, "Console closed");

    Ok(())
}
