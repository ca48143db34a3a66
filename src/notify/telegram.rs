// src/notify/telegram.rs
// Telegram Bot API transport plus the long-poll update loop feeding the
// toggle-callback handler. Markdown parse mode, one row of inline buttons.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::callback::{self, CallbackOutcome};
use crate::notify::{InlineButton, MessageRef, Transport};
use crate::store::Store;

const BAD_TOKEN_REPLY: &str = "Unrecognized action.";
const UNAVAILABLE_REPLY: &str = "This summary is no longer available.";
const START_REPLY: &str = "✅ Relay is online and watching the channel.";

#[derive(Clone)]
pub struct TelegramTransport {
    api_base: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl TelegramTransport {
    pub fn new(bot_token: String) -> Self {
        Self {
            api_base: format!("https://api.telegram.org/bot{bot_token}"),
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    pub fn from_env() -> Result<Self> {
        let token =
            std::env::var("TELEGRAM_BOT_TOKEN").context("Missing TELEGRAM_BOT_TOKEN env var")?;
        Ok(Self::new(token))
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    fn keyboard(controls: &[InlineButton]) -> serde_json::Value {
        let row: Vec<serde_json::Value> = controls
            .iter()
            .map(|b| json!({ "text": b.label, "callback_data": b.action }))
            .collect();
        json!({ "inline_keyboard": [row] })
    }

    /// POST a method with retry and exponential backoff.
    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.api_base, method);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("Telegram {method} HTTP error: {e}"));
                    }
                    let api: ApiResponse = rsp.json().await.context("Telegram response body")?;
                    if !api.ok {
                        return Err(anyhow!(
                            "Telegram {method} rejected: {}",
                            api.description.unwrap_or_default()
                        ));
                    }
                    return Ok(api.result.unwrap_or(serde_json::Value::Null));
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Telegram {method} request failed: {e}"));
                }
            }
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let result = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"],
                }),
            )
            .await?;
        let updates: Vec<Update> = serde_json::from_value(result).context("parse updates")?;
        Ok(updates)
    }

    async fn answer_callback(&self, id: &str, text: Option<&str>, alert: bool) -> Result<()> {
        let mut body = json!({ "callback_query_id": id });
        if let Some(t) = text {
            body["text"] = json!(t);
            body["show_alert"] = json!(alert);
        }
        self.call("answerCallbackQuery", body).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for TelegramTransport {
    async fn send(
        &self,
        destination: &str,
        text: &str,
        controls: &[InlineButton],
    ) -> Result<MessageRef> {
        let mut body = json!({
            "chat_id": destination,
            "text": text,
            "parse_mode": "Markdown",
        });
        if !controls.is_empty() {
            body["reply_markup"] = Self::keyboard(controls);
        }
        let result = self.call("sendMessage", body).await?;
        let msg: TgMessage = serde_json::from_value(result).context("parse sendMessage result")?;
        Ok(MessageRef {
            chat_id: msg.chat.id.to_string(),
            message_id: msg.message_id.to_string(),
        })
    }

    async fn edit(
        &self,
        message: &MessageRef,
        text: &str,
        controls: &[InlineButton],
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id.parse::<i64>().unwrap_or_default(),
            "text": text,
            "parse_mode": "Markdown",
        });
        if !controls.is_empty() {
            body["reply_markup"] = Self::keyboard(controls);
        }
        self.call("editMessageText", body).await?;
        Ok(())
    }

    async fn edit_controls(&self, message: &MessageRef, controls: &[InlineButton]) -> Result<()> {
        self.call(
            "editMessageReplyMarkup",
            json!({
                "chat_id": message.chat_id,
                "message_id": message.message_id.parse::<i64>().unwrap_or_default(),
                "reply_markup": Self::keyboard(controls),
            }),
        )
        .await?;
        Ok(())
    }
}

/// Long-poll loop: answers `/start`, parses callback tokens once at the
/// boundary and routes valid actions to the toggle handler. Never returns;
/// fetch failures back off and retry.
pub async fn run_update_loop(transport: Arc<TelegramTransport>, store: Arc<Store>) {
    let mut offset: i64 = 0;
    loop {
        let updates = match transport.get_updates(offset).await {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(error = ?e, "getUpdates failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);

            if let Some(cb) = update.callback_query {
                handle_callback_update(&transport, &store, cb).await;
            } else if let Some(msg) = update.message {
                if msg.text.as_deref() == Some("/start") {
                    let dest = msg.chat.id.to_string();
                    if let Err(e) = transport.send(&dest, START_REPLY, &[]).await {
                        tracing::warn!(error = ?e, "start reply failed");
                    }
                }
            }
        }
    }
}

async fn handle_callback_update(
    transport: &Arc<TelegramTransport>,
    store: &Arc<Store>,
    cb: TgCallbackQuery,
) {
    let Some(action) = cb.data.as_deref().and_then(callback::parse_action) else {
        // invalid token: user-visible error, no side effects
        if let Err(e) = transport.answer_callback(&cb.id, Some(BAD_TOKEN_REPLY), true).await {
            tracing::warn!(error = ?e, "answerCallbackQuery failed");
        }
        return;
    };

    let reply = match callback::handle_action(store, transport.as_ref() as &dyn Transport, action)
        .await
    {
        Ok(CallbackOutcome::Toggled) => None,
        Ok(CallbackOutcome::Unavailable) => Some(UNAVAILABLE_REPLY),
        Err(e) => {
            tracing::warn!(error = ?e, "toggle handling failed");
            Some("Temporarily unavailable, try again later.")
        }
    };
    if let Err(e) = transport.answer_callback(&cb.id, reply, reply.is_some()).await {
        tracing::warn!(error = ?e, "answerCallbackQuery failed");
    }
}

// ---- wire types (the subset this relay reads) ----

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
    callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgCallbackQuery {
    id: String,
    data: Option<String>,
}
