// src/callback.rs
// Two-state toggle protocol for summary drill-down. Inbound tokens are parsed
// once at the boundary into a tagged action; both renders edit the original
// message in place, never creating a new one.

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::DetailEntry;
use crate::error::{RelayError, Result};
use crate::notify::{InlineButton, MessageRef, Transport};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Expand(i64),
    Collapse(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Toggled,
    /// The referenced summary was reclaimed by the janitor.
    Unavailable,
}

/// Strict token format: `expand_<id>` or `collapse_<id>`. Anything else is
/// rejected before any store access.
pub fn parse_action(token: &str) -> Option<CallbackAction> {
    let (kind, id) = token.split_once('_')?;
    let id: i64 = id.parse().ok()?;
    if id <= 0 {
        return None;
    }
    match kind {
        "expand" => Some(CallbackAction::Expand(id)),
        "collapse" => Some(CallbackAction::Collapse(id)),
        _ => None,
    }
}

pub fn expand_button(summary_id: i64) -> InlineButton {
    InlineButton::new("📋 Details", format!("expand_{summary_id}"))
}

pub fn collapse_button(summary_id: i64) -> InlineButton {
    InlineButton::new("🔼 Hide", format!("collapse_{summary_id}"))
}

pub async fn handle_action(
    store: &Store,
    transport: &dyn Transport,
    action: CallbackAction,
) -> Result<CallbackOutcome> {
    let summary_id = match action {
        CallbackAction::Expand(id) | CallbackAction::Collapse(id) => id,
    };
    let row = match store.get_summary(summary_id) {
        Ok(row) => row,
        Err(RelayError::StaleReference(_)) => return Ok(CallbackOutcome::Unavailable),
        Err(e) => return Err(e),
    };
    let message = MessageRef {
        chat_id: row.chat_id.clone(),
        message_id: row.message_id.clone(),
    };

    match action {
        CallbackAction::Expand(id) => {
            let details: Vec<DetailEntry> =
                serde_json::from_str(&row.details_json).map_err(|e| {
                    RelayError::malformed(format!("summary {id} detail payload"), e.to_string())
                })?;
            let text = render_expanded(&details);
            transport
                .edit(&message, &text, &[collapse_button(id)])
                .await
                .map_err(RelayError::Transport)?;
        }
        CallbackAction::Collapse(id) => {
            transport
                .edit(&message, &row.summary_text, &[expand_button(id)])
                .await
                .map_err(RelayError::Transport)?;
        }
    }
    Ok(CallbackOutcome::Toggled)
}

/// Expanded view: per category, the unique embedded ids in sorted order.
pub fn render_expanded(details: &[DetailEntry]) -> String {
    let mut grouped: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for entry in details {
        grouped
            .entry(entry.category.as_str())
            .or_default()
            .insert(entry.embedded_id.as_deref().unwrap_or("n/a"));
    }

    let mut out = String::from("📋 *Alert details by category:*\n");
    for (category, ids) in grouped {
        let count = ids.len();
        let joined = ids.into_iter().collect::<Vec<_>>().join(", ");
        out.push_str(&format!("\n*{category}* ({count}): `{joined}`\n"));
    }
    out
}
