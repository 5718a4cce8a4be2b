//! Keyboard layouts attached to outbound messages.
//!
//! Labels are laid out left to right. A label ending in `'\n'` closes the
//! current row; the marker is stripped from the visible text.

use serde::{Deserialize, Serialize};

/// A button on an inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub data: String,
}

/// A keyboard attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Keyboard {
    /// Buttons that send their label back as a text message.
    Reply { rows: Vec<Vec<String>> },
    /// Buttons that send callback data back as a button press.
    Inline { rows: Vec<Vec<InlineButton>> },
    /// Removes a previously shown reply keyboard.
    Remove,
}

/// Strips the row-break marker from a label.
///
/// Returns the visible text and whether the label closes its row.
pub fn split_label(label: &str) -> (&str, bool) {
    match label.strip_suffix('\n') {
        Some(text) => (text, true),
        None => (label, false),
    }
}

fn layout<T>(items: impl IntoIterator<Item = (T, bool)>) -> Vec<Vec<T>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    for (item, breaks) in items {
        row.push(item);
        if breaks {
            rows.push(std::mem::take(&mut row));
        }
    }
    if !row.is_empty() {
        rows.push(row);
    }
    rows
}

impl Keyboard {
    /// Builds a reply keyboard from labels.
    pub fn reply<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rows = layout(labels.into_iter().map(|label| {
            let (text, breaks) = split_label(label.as_ref());
            (text.to_string(), breaks)
        }));
        Keyboard::Reply { rows }
    }

    /// Builds an inline keyboard from `(label, data)` pairs.
    ///
    /// The row-break marker is read from the label.
    pub fn inline<I, L, D>(buttons: I) -> Self
    where
        I: IntoIterator<Item = (L, D)>,
        L: AsRef<str>,
        D: Into<String>,
    {
        let rows = layout(buttons.into_iter().map(|(label, data)| {
            let (text, breaks) = split_label(label.as_ref());
            (
                InlineButton {
                    text: text.to_string(),
                    data: data.into(),
                },
                breaks,
            )
        }));
        Keyboard::Inline { rows }
    }

    /// Returns `true` if the keyboard has no buttons.
    pub fn is_empty(&self) -> bool {
        match self {
            Keyboard::Reply { rows } => rows.iter().all(Vec::is_empty),
            Keyboard::Inline { rows } => rows.iter().all(Vec::is_empty),
            Keyboard::Remove => false,
        }
    }
}
