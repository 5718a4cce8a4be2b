//! Slash-command parsing and argument binding.
//!
//! A command is a text message of the form `/name[@username] arg1 arg2 ...`.
//! The `@username` suffix addresses one bot among several in a group; it must
//! equal the bot's own username. Without a suffix, commands are only accepted
//! in private chats.
//!
//! Arguments are bound to the method's declared parameters by position using
//! the [`TypeMapper`]. A trailing `string` parameter absorbs every remaining
//! token, rejoined with single spaces.
//!
//! ```rust,ignore
//! // "/remind 10 buy some milk" bound to (minutes: u32, text: String)
//! let entry = HandlerEntry::new("reminders").method(
//!     Method::new("remind", remind)
//!         .when(Condition::command("remind"))
//!         .param(Param::of::<u32>("minutes"))
//!         .param(Param::of::<String>("text")),
//! );
//! ```

use switchyard_core::Update;

use crate::error::{CommandBindError, MapError};
use crate::mapper::{Arg, Args, Param, ParamType, TypeMapper};

/// Marker that starts a command.
pub const COMMAND_PREFIX: char = '/';

/// Command condition parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    /// Whether positional tokens are bound to the method's parameters.
    pub map_arguments: bool,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            map_arguments: true,
        }
    }

    pub fn without_arguments(mut self) -> Self {
        self.map_arguments = false;
        self
    }
}

/// Description of a command, passed to the command-error handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub params: Vec<Param>,
}

impl CommandInfo {
    /// Renders the usage line followed by one indented line per described
    /// parameter.
    pub fn help(&self) -> String {
        let mut help = self.usage();
        for param in &self.params {
            if let Some(description) = &param.description {
                help.push_str(&format!("\n  {}: {description}", param.name));
            }
        }
        help
    }

    /// Renders a usage line such as `/args <a: i32> [b: string]`.
    pub fn usage(&self) -> String {
        let mut usage = format!("{COMMAND_PREFIX}{}", self.name);
        for param in &self.params {
            if param.required {
                usage.push_str(&format!(" <{}: {}>", param.name, param.ty));
            } else {
                usage.push_str(&format!(" [{}: {}]", param.name, param.ty));
            }
        }
        usage
    }
}

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub target: Option<String>,
    pub args: Vec<String>,
}

impl Command {
    /// Parses the command in a text message.
    ///
    /// Returns `None` if the update is not a command, or is addressed to
    /// another bot, or has no `@username` suffix outside a private chat.
    pub fn parse(update: &Update, bot_username: Option<&str>) -> Option<Command> {
        let text = update.text()?;
        let body = text.strip_prefix(COMMAND_PREFIX)?;
        // The name must follow the prefix directly: "/ start" is no command.
        let (head, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        if head.is_empty() {
            return None;
        }
        let args = rest.split_whitespace().map(str::to_string).collect();

        let (name, target) = match head.split_once('@') {
            Some((name, target)) => {
                if bot_username != Some(target) {
                    return None;
                }
                (name, Some(target.to_string()))
            }
            None if update.is_private() => (head, None),
            None => return None,
        };

        Some(Command {
            name: name.to_string(),
            target,
            args,
        })
    }

    /// Binds the command's tokens to `params`.
    ///
    /// - Missing required tokens fail at the index of the first absent one.
    /// - The last parameter, if it is a `string`, absorbs all remaining
    ///   tokens when more than one is left.
    /// - An optional parameter with no token binds [`Arg::Missing`].
    /// - Surplus tokens are ignored.
    pub fn bind(&self, params: &[Param], mapper: &TypeMapper) -> Result<Args, CommandBindError> {
        let required = params.iter().filter(|param| param.required).count();
        if required > self.args.len() {
            return Err(CommandBindError {
                parameter_index: self.args.len(),
                source: MapError::Missing,
            });
        }

        let mut args = Vec::with_capacity(params.len());
        let mut idx = 0;
        for (i, param) in params.iter().enumerate() {
            if idx >= self.args.len() {
                args.push(Arg::Missing);
                break;
            }

            let is_last = i + 1 == params.len();
            if is_last && idx + 1 < self.args.len() && param.ty == ParamType::String {
                args.push(Arg::Text(self.args[idx..].join(" ")));
                break;
            }

            let arg = mapper
                .map(&param.ty, &self.args[idx])
                .map_err(|source| CommandBindError {
                    parameter_index: idx,
                    source,
                })?;
            args.push(arg);
            idx += 1;
        }

        Ok(Args::new(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::{Chat, Message, UpdateKind, User};

    fn message(chat: Chat, text: &str) -> Update {
        Update::new(
            1,
            UpdateKind::Message(Message::text(1, chat, Some(User::new(1)), text)),
        )
    }

    fn parse(text: &str) -> Option<Command> {
        Command::parse(&message(Chat::private(1), text), Some("yard_bot"))
    }

    #[test]
    fn test_parse_private_command() {
        let command = parse("/args 5 hello").unwrap();
        assert_eq!(command.name, "args");
        assert_eq!(command.target, None);
        assert_eq!(command.args, vec!["5", "hello"]);
    }

    #[test]
    fn test_parse_rejects_non_commands() {
        assert!(parse("args 5").is_none());
        assert!(parse("/").is_none());
        assert!(parse("/ start").is_none());
        assert!(parse("/\tstart").is_none());
        assert!(parse("/start@other_bot").is_none());
    }

    #[test]
    fn test_group_requires_suffix() {
        let group = Chat::group(-5);
        assert!(Command::parse(&message(group.clone(), "/start"), Some("yard_bot")).is_none());
        let command = Command::parse(&message(group, "/start@yard_bot now"), Some("yard_bot"));
        assert_eq!(command.unwrap().target.as_deref(), Some("yard_bot"));
    }

    #[test]
    fn test_bind_typed_arguments() {
        let params = [Param::of::<i32>("a"), Param::of::<String>("b")];
        let args = parse("/args 5 hello")
            .unwrap()
            .bind(&params, &TypeMapper::new())
            .unwrap();
        assert_eq!(args.raw(), &[Arg::Int(5), Arg::Text("hello".into())]);
    }

    #[test]
    fn test_bind_failure_reports_index() {
        let params = [Param::of::<i32>("a"), Param::of::<String>("b")];
        let err = parse("/args notanumber x")
            .unwrap()
            .bind(&params, &TypeMapper::new())
            .unwrap_err();
        assert_eq!(err.parameter_index, 0);
        assert!(matches!(err.source, MapError::Parse { .. }));
    }

    #[test]
    fn test_bind_missing_required() {
        let params = [Param::of::<i32>("a"), Param::of::<i32>("b")];
        let err = parse("/sum 1")
            .unwrap()
            .bind(&params, &TypeMapper::new())
            .unwrap_err();
        assert_eq!(err.parameter_index, 1);
        assert!(matches!(err.source, MapError::Missing));
    }

    #[test]
    fn test_trailing_string_is_greedy() {
        let params = [Param::of::<u32>("minutes"), Param::of::<String>("text")];
        let args = parse("/remind 10 buy   some milk")
            .unwrap()
            .bind(&params, &TypeMapper::new())
            .unwrap();
        assert_eq!(args.get::<String>(1).unwrap(), "buy some milk");
    }

    #[test]
    fn test_optional_and_surplus() {
        let params = [Param::of::<i32>("a"), Param::of::<Option<i32>>("b")];
        let mapper = TypeMapper::new();

        let args = parse("/opt 1").unwrap().bind(&params, &mapper).unwrap();
        assert_eq!(args.get::<Option<i32>>(1).unwrap(), None);

        let args = parse("/opt 1 2 3").unwrap().bind(&params, &mapper).unwrap();
        assert_eq!(args.raw(), &[Arg::Int(1), Arg::Int(2)]);
    }

    #[test]
    fn test_usage_line() {
        let info = CommandInfo {
            name: "args".into(),
            params: vec![Param::of::<i32>("a"), Param::of::<Option<String>>("b")],
        };
        assert_eq!(info.usage(), "/args <a: i32> [b: string]");
        assert_eq!(info.help(), info.usage());
    }

    #[test]
    fn test_help_lists_descriptions() {
        let info = CommandInfo {
            name: "paint".into(),
            params: vec![
                Param::of::<u8>("x"),
                Param::custom("color", "color")
                    .optional()
                    .describe("any named color"),
            ],
        };
        assert_eq!(info.usage(), "/paint <x: u8> [color: color]");
        assert_eq!(
            info.help(),
            "/paint <x: u8> [color: color]\n  color: any named color"
        );
    }
}
