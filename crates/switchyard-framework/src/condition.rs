//! Conditions select which method serves an update.
//!
//! A [`Condition`] is a pure predicate over an update and the conversation
//! state. Some conditions also extract arguments for the method they guard:
//! [`MatchOp::RegexCapture`] selectors bind their captured groups, and command
//! conditions bind positional tokens (see [`crate::command`]).
//!
//! Text, button, inline and state conditions compare a candidate string
//! against a [`Selector`]:
//!
//! ```rust,ignore
//! use switchyard_framework::{Condition, Selector};
//!
//! // Exact text, as shown on a reply keyboard
//! Condition::text("Open main");
//! // Button data with a captured page number
//! Condition::button(Selector::capture(r"^page-(\d+)$"));
//! // Only while the conversation is in the "settings" sub-menu
//! Condition::sub_menu("settings");
//! ```

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use switchyard_core::{ConversationState, MessageKind, Update};
use tracing::trace;

use crate::command::{Command, CommandSpec};
use crate::error::{BindError, ExtractError};
use crate::mapper::{Arg, Args, Param, TypeMapper};

// ============================================================================
// Selectors
// ============================================================================

/// Comparison applied by a [`Selector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equals,
    StartsWith,
    EndsWith,
    Contains,
    Regex,
    /// Like [`MatchOp::Regex`], and binds captured groups to parameters.
    RegexCapture,
}

/// A comparison against a candidate string.
///
/// A selector without a pattern matches any candidate.
#[derive(Debug, Clone)]
pub struct Selector {
    op: MatchOp,
    pattern: Option<String>,
    regex: Option<Regex>,
    invalid: Option<String>,
}

impl Selector {
    pub fn new(op: MatchOp, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let (regex, invalid) = match op {
            MatchOp::Regex | MatchOp::RegexCapture => match Regex::new(&pattern) {
                Ok(regex) => (Some(regex), None),
                Err(e) => (None, Some(e.to_string())),
            },
            _ => (None, None),
        };
        Self {
            op,
            pattern: Some(pattern),
            regex,
            invalid,
        }
    }

    /// A selector that matches anything.
    pub fn any() -> Self {
        Self {
            op: MatchOp::Equals,
            pattern: None,
            regex: None,
            invalid: None,
        }
    }

    pub fn equals(pattern: impl Into<String>) -> Self {
        Self::new(MatchOp::Equals, pattern)
    }

    pub fn starts_with(pattern: impl Into<String>) -> Self {
        Self::new(MatchOp::StartsWith, pattern)
    }

    pub fn ends_with(pattern: impl Into<String>) -> Self {
        Self::new(MatchOp::EndsWith, pattern)
    }

    pub fn contains(pattern: impl Into<String>) -> Self {
        Self::new(MatchOp::Contains, pattern)
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::new(MatchOp::Regex, pattern)
    }

    pub fn capture(pattern: impl Into<String>) -> Self {
        Self::new(MatchOp::RegexCapture, pattern)
    }

    pub fn op(&self) -> MatchOp {
        self.op
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Returns the compile error of an invalid regex pattern.
    pub fn compile_error(&self) -> Option<&str> {
        self.invalid.as_deref()
    }

    /// Returns the number of groups a capturing selector binds.
    pub fn capture_count(&self) -> Option<usize> {
        match (self.op, &self.regex) {
            (MatchOp::RegexCapture, Some(regex)) => Some(regex.captures_len() - 1),
            _ => None,
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        let Some(pattern) = self.pattern.as_deref() else {
            return true;
        };
        match self.op {
            // Keyboard labels carry a trailing row-break marker.
            MatchOp::Equals => value == pattern.strip_suffix('\n').unwrap_or(pattern),
            MatchOp::StartsWith => value.starts_with(pattern),
            MatchOp::EndsWith => value.ends_with(pattern),
            MatchOp::Contains => value.contains(pattern),
            MatchOp::Regex | MatchOp::RegexCapture => {
                self.regex.as_ref().is_some_and(|regex| regex.is_match(value))
            }
        }
    }

    /// Returns the captured groups of `value`, in order.
    ///
    /// Groups that did not participate in the match yield an empty string.
    pub fn captures(&self, value: &str) -> Option<Vec<String>> {
        if self.op != MatchOp::RegexCapture {
            return None;
        }
        let captures = self.regex.as_ref()?.captures(value)?;
        Some(
            captures
                .iter()
                .skip(1)
                .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
                .collect(),
        )
    }
}

impl From<&str> for Selector {
    fn from(pattern: &str) -> Self {
        Selector::equals(pattern)
    }
}

impl From<String> for Selector {
    fn from(pattern: String) -> Self {
        Selector::equals(pattern)
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// Inputs a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub update: &'a Update,
    pub state: &'a ConversationState,
    /// Routing identity for `/command@username` suffixes.
    pub bot_username: Option<&'a str>,
}

/// An application-defined predicate.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&MatchContext<'_>) -> bool + Send + Sync>);

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate")
    }
}

/// A predicate used to select a method for an update.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Text of a new text message.
    Text { selector: Selector, hidden: bool },
    /// A new message of the given content kind.
    MessageOfKind(MessageKind),
    /// Data of a button press.
    Button {
        selector: Selector,
        /// Label shown on generated keyboards, defaults to the data.
        label: Option<String>,
        hidden: bool,
    },
    /// Query string of an inline query.
    InlineQuery(Selector),
    /// Query string of a chosen inline result.
    InlineResult(Selector),
    /// A string value in the conversation's data bag.
    StateValue { key: String, selector: Selector },
    /// The conversation's sub-menu.
    SubMenu(Selector),
    /// `true` for private chats only, `false` for group chats only.
    Privacy(bool),
    /// A slash command.
    Command(CommandSpec),
    Custom(Predicate),
}

impl Condition {
    pub fn text(selector: impl Into<Selector>) -> Self {
        Condition::Text {
            selector: selector.into(),
            hidden: false,
        }
    }

    /// Any new text message.
    pub fn any_text() -> Self {
        Self::text(Selector::any())
    }

    pub fn kind(kind: MessageKind) -> Self {
        Condition::MessageOfKind(kind)
    }

    pub fn button(selector: impl Into<Selector>) -> Self {
        Condition::Button {
            selector: selector.into(),
            label: None,
            hidden: false,
        }
    }

    /// A button whose generated label differs from its data.
    pub fn labeled_button(data: impl Into<String>, label: impl Into<String>) -> Self {
        Condition::Button {
            selector: Selector::equals(data),
            label: Some(label.into()),
            hidden: false,
        }
    }

    pub fn inline_query(selector: impl Into<Selector>) -> Self {
        Condition::InlineQuery(selector.into())
    }

    pub fn inline_result(selector: impl Into<Selector>) -> Self {
        Condition::InlineResult(selector.into())
    }

    pub fn state(key: impl Into<String>, selector: impl Into<Selector>) -> Self {
        Condition::StateValue {
            key: key.into(),
            selector: selector.into(),
        }
    }

    pub fn sub_menu(selector: impl Into<Selector>) -> Self {
        Condition::SubMenu(selector.into())
    }

    pub fn private() -> Self {
        Condition::Privacy(true)
    }

    pub fn group() -> Self {
        Condition::Privacy(false)
    }

    /// A command whose arguments are bound to the method's parameters.
    pub fn command(name: impl Into<String>) -> Self {
        Condition::Command(CommandSpec::new(name))
    }

    /// A command whose arguments are left unbound.
    pub fn raw_command(name: impl Into<String>) -> Self {
        Condition::Command(CommandSpec::new(name).without_arguments())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&MatchContext<'_>) -> bool + Send + Sync + 'static,
    {
        Condition::Custom(Predicate(Arc::new(f)))
    }

    /// Excludes a text or button condition from generated keyboards.
    pub fn hidden(self) -> Self {
        match self {
            Condition::Text { selector, .. } => Condition::Text {
                selector,
                hidden: true,
            },
            Condition::Button {
                selector, label, ..
            } => Condition::Button {
                selector,
                label,
                hidden: true,
            },
            other => other,
        }
    }

    /// Returns the selector this condition compares with, if any.
    pub fn selector(&self) -> Option<&Selector> {
        match self {
            Condition::Text { selector, .. }
            | Condition::Button { selector, .. }
            | Condition::InlineQuery(selector)
            | Condition::InlineResult(selector)
            | Condition::StateValue { selector, .. }
            | Condition::SubMenu(selector) => Some(selector),
            _ => None,
        }
    }

    /// Returns the candidate string this condition compares, or `None` if
    /// the update is of the wrong kind.
    fn candidate(&self, cx: &MatchContext<'_>) -> Option<String> {
        match self {
            Condition::Text { .. } => {
                if cx.update.message_kind() != Some(MessageKind::Text) {
                    return None;
                }
                Some(cx.update.text().unwrap_or_default().to_string())
            }
            Condition::Button { .. } => cx
                .update
                .is_callback()
                .then(|| cx.update.callback_data().unwrap_or_default().to_string()),
            Condition::InlineQuery(_) => cx.update.inline_query().map(str::to_string),
            Condition::InlineResult(_) => cx.update.inline_result_query().map(str::to_string),
            Condition::StateValue { key, .. } => cx.state.get::<String>(key).ok().flatten(),
            Condition::SubMenu(_) => cx.state.sub_menu.clone(),
            _ => None,
        }
    }

    /// Evaluates the condition.
    pub fn matches(&self, cx: &MatchContext<'_>) -> bool {
        match self {
            Condition::MessageOfKind(kind) => cx.update.message_kind() == Some(*kind),
            Condition::Privacy(private) => cx.update.is_private() == *private,
            Condition::Command(spec) => Command::parse(cx.update, cx.bot_username)
                .is_some_and(|command| command.name == spec.name),
            Condition::Custom(predicate) => (predicate.0)(cx),
            _ => match (self.selector(), self.candidate(cx)) {
                (Some(selector), Some(value)) => selector.matches(&value),
                _ => false,
            },
        }
    }

    /// Extracts arguments for `params`, if this condition binds any.
    ///
    /// Returns `None` for conditions that do not bind arguments.
    pub fn extract(
        &self,
        cx: &MatchContext<'_>,
        params: &[Param],
        mapper: &TypeMapper,
    ) -> Option<Result<Args, BindError>> {
        if let Condition::Command(spec) = self {
            if !spec.map_arguments {
                return None;
            }
            let command = Command::parse(cx.update, cx.bot_username)?;
            return Some(command.bind(params, mapper).map_err(BindError::from));
        }

        let selector = self.selector()?;
        selector.capture_count()?;
        let value = self.candidate(cx)?;
        let groups = selector.captures(&value)?;
        trace!(groups = groups.len(), "Binding captured groups");
        Some(bind_captures(&groups, params, mapper))
    }

    /// Returns the label this condition contributes to a reply keyboard.
    pub fn reply_label(&self) -> Option<&str> {
        match self {
            Condition::Text {
                selector,
                hidden: false,
            } if selector.op() == MatchOp::Equals => selector.pattern(),
            _ => None,
        }
    }

    /// Returns the `(label, data)` pair this condition contributes to an
    /// inline keyboard.
    pub fn inline_button(&self) -> Option<(String, String)> {
        match self {
            Condition::Button {
                selector,
                label,
                hidden: false,
            } if selector.op() == MatchOp::Equals => {
                let data = selector.pattern()?;
                let label = label.clone().unwrap_or_else(|| data.to_string());
                let data = data.strip_suffix('\n').unwrap_or(data).to_string();
                Some((label, data))
            }
            _ => None,
        }
    }
}

fn bind_captures(groups: &[String], params: &[Param], mapper: &TypeMapper) -> Result<Args, BindError> {
    if groups.len() != params.len() {
        return Err(ExtractError::custom(format!(
            "expected {} captured groups, found {}",
            params.len(),
            groups.len()
        ))
        .into());
    }
    groups
        .iter()
        .zip(params)
        .enumerate()
        .map(|(index, (group, param))| {
            mapper
                .map(&param.ty, group)
                .map_err(|source| BindError::from(ExtractError::Capture { index, source }))
        })
        .collect::<Result<Vec<Arg>, BindError>>()
        .map(Args::new)
}
