// src/notify/mod.rs
pub mod guard;
pub mod telegram;

use anyhow::Result;

/// Handle to a delivered message, kept so later edits can address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: String,
    pub message_id: String,
}

/// One inline control attached to a message. `action` is the opaque token
/// delivered back through the callback channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub action: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        destination: &str,
        text: &str,
        controls: &[InlineButton],
    ) -> Result<MessageRef>;

    /// Replace an existing message's text and controls in place.
    async fn edit(&self, message: &MessageRef, text: &str, controls: &[InlineButton])
        -> Result<()>;

    /// Replace only the controls, leaving the text untouched.
    async fn edit_controls(&self, message: &MessageRef, controls: &[InlineButton]) -> Result<()>;
}
