//! Message template auto-discovery for the newer control dialect.
//!
//! Newer endpoints have no fixed message slot. The bridge requests the
//! template list and adopts the first template whose title carries the
//! operator's marker and whose text contains a `${Token}` placeholder.

use std::sync::LazyLock;

use regex::Regex;

use crate::payload::MessageSlot;
use crate::remote::MessageTemplate;

/// Placeholder pattern inside template components.
static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9]+)\}").ok());

/// Scan `templates` for the first usable message slot.
///
/// A template is usable when its title contains `marker`
/// (case-insensitive) and any of its components carries a placeholder.
/// The template's list index and the placeholder's token name form the
/// slot. Returns `None` when nothing matches.
#[must_use]
pub fn find_slot(templates: &[MessageTemplate], marker: &str) -> Option<MessageSlot> {
    let pattern = PLACEHOLDER.as_ref()?;
    let marker = marker.to_lowercase();

    for (index, template) in templates.iter().enumerate() {
        if !template.title.to_lowercase().contains(&marker) {
            continue;
        }
        for component in &template.components {
            if let Some(captures) = pattern.captures(component) {
                let token = captures.get(1)?.as_str().to_string();
                let index = u32::try_from(index).ok()?;
                return Some(MessageSlot { index, token });
            }
        }
    }

    None
}
