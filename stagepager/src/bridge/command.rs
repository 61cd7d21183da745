//! Parsing of inbound chat messages into bridge commands.

use std::sync::LazyLock;

use regex::Regex;

/// First run of exactly four digits anywhere in a message.
static CODE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d{4}").ok());

/// What an inbound message asks the bridge to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Display this code.
    Show(String),
    /// Display the last accepted code again.
    Repeat,
    /// Hide whatever is on screen.
    Cancel,
}

/// Extract the command from a message body, if any.
///
/// An embedded 4-digit code wins over the keywords, so "repeat 1234"
/// shows 1234. The `repeat` and `cancel` keywords match anywhere in the
/// text, case-insensitive.
#[must_use]
pub fn parse(text: &str) -> Option<Command> {
    if let Some(code) = four_digit_code(text) {
        return Some(Command::Show(code.to_string()));
    }

    let lower = text.to_lowercase();
    if lower.contains("repeat") {
        return Some(Command::Repeat);
    }
    if lower.contains("cancel") {
        return Some(Command::Cancel);
    }

    None
}

fn four_digit_code(text: &str) -> Option<&str> {
    let pattern = CODE_PATTERN.as_ref()?;
    pattern.find(text).map(|found| found.as_str())
}
