// src/ingest/teams.rs
// Microsoft Graph channel connector. Channel posts are relayed mail, so the
// sender and subject arrive as labelled lines inside an HTML body; the
// connector strips the markup and lifts them out. Token acquisition sits
// behind its own trait so tests and other tenants can swap it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::{RawItem, SourceConnector};

const DEFAULT_SENDER_LABEL: &str = "Отправитель:";
const DEFAULT_SUBJECT_LABEL: &str = "Тема:";

#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Client-credentials flow against the tenant login endpoint.
pub struct ClientCredentialsTokenProvider {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    client: Client,
}

impl ClientCredentialsTokenProvider {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            tenant_id: std::env::var("AZURE_TENANT_ID").context("Missing AZURE_TENANT_ID")?,
            client_id: std::env::var("AZURE_CLIENT_ID").context("Missing AZURE_CLIENT_ID")?,
            client_secret: std::env::var("AZURE_CLIENT_SECRET")
                .context("Missing AZURE_CLIENT_SECRET")?,
            client: Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn access_token(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        );
        let rsp = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", "https://graph.microsoft.com/.default"),
                ("grant_type", "client_credentials"),
            ])
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .context("token post")?
            .error_for_status()
            .context("token non-2xx")?;
        let token: TokenResponse = rsp.json().await.context("token body")?;
        Ok(token.access_token)
    }
}

pub struct TeamsConnector {
    team_id: String,
    channel_id: String,
    tokens: Arc<dyn TokenProvider>,
    client: Client,
    timeout: Duration,
    sender_label: String,
    subject_label: String,
}

impl TeamsConnector {
    pub fn new(team_id: String, channel_id: String, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            team_id,
            channel_id,
            tokens,
            client: Client::new(),
            timeout: Duration::from_secs(15),
            sender_label: DEFAULT_SENDER_LABEL.to_string(),
            subject_label: DEFAULT_SUBJECT_LABEL.to_string(),
        }
    }

    pub fn from_env(tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        Ok(Self::new(
            std::env::var("TEAM_ID").context("Missing TEAM_ID")?,
            std::env::var("CHANNEL_ID").context("Missing CHANNEL_ID")?,
            tokens,
        ))
    }

    pub fn with_labels(mut self, sender: impl Into<String>, subject: impl Into<String>) -> Self {
        self.sender_label = sender.into();
        self.subject_label = subject.into();
        self
    }

    fn parse_message(&self, msg: GraphMessage) -> Option<RawItem> {
        let timestamp = match DateTime::parse_from_rfc3339(&msg.created_date_time) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(id = %msg.id, error = %e, "message timestamp unparseable, skipped");
                return None;
            }
        };

        let text = strip_html(&msg.body.map(|b| b.content).unwrap_or_default());
        let mut sender = String::new();
        let mut subject = String::new();
        let mut body = String::new();
        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix(self.sender_label.as_str()) {
                sender = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix(self.subject_label.as_str()) {
                subject = rest.trim().to_string();
            } else if !line.is_empty() {
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(line);
            }
        }

        Some(RawItem {
            id: msg.id,
            sender,
            subject,
            body,
            timestamp,
        })
    }
}

#[async_trait::async_trait]
impl SourceConnector for TeamsConnector {
    async fn fetch(&self, _since_cursor: Option<&str>) -> Result<Vec<RawItem>> {
        let token = self.tokens.access_token().await.context("acquire token")?;
        let url = format!(
            "https://graph.microsoft.com/v1.0/teams/{}/channels/{}/messages",
            self.team_id, self.channel_id
        );
        let rsp = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .timeout(self.timeout)
            .send()
            .await
            .context("graph get")?
            .error_for_status()
            .context("graph non-2xx")?;
        let page: GraphPage = rsp.json().await.context("graph body")?;

        Ok(page
            .value
            .into_iter()
            .filter_map(|msg| self.parse_message(msg))
            .collect())
    }

    fn name(&self) -> &'static str {
        "teams"
    }
}

/// Decode entities and drop tags; the channel payload is simple mail HTML.
pub fn strip_html(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    let decoded = html_escape::decode_html_entities(s).to_string();
    re_tags.replace_all(&decoded, "").trim().to_string()
}

// ---- wire types ----

#[derive(Debug, Deserialize)]
struct GraphPage {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: String,
    #[serde(rename = "createdDateTime")]
    created_date_time: String,
    body: Option<GraphBody>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedToken;

    #[async_trait::async_trait]
    impl TokenProvider for FixedToken {
        async fn access_token(&self) -> Result<String> {
            Ok("token".to_string())
        }
    }

    fn connector() -> TeamsConnector {
        TeamsConnector::new("t".into(), "c".into(), Arc::new(FixedToken))
    }

    #[test]
    fn strips_tags_and_decodes_entities() {
        let out = strip_html("<p>Тема:&nbsp;STOPAZART</p><br><div>ID игрока: 1</div>");
        assert!(out.contains("Тема:"));
        assert!(out.contains("STOPAZART"));
        assert!(!out.contains('<'));
    }

    #[test]
    fn lifts_labelled_sender_and_subject_out_of_body() {
        let msg = GraphMessage {
            id: "42".into(),
            created_date_time: "2026-08-07T10:00:00Z".into(),
            body: Some(GraphBody {
                content: "<p>Отправитель: noreply@winline.kz</p>\n<p>Тема: Ошибка STOPAZART</p>\n<p>ID игрока: 111</p>".into(),
            }),
        };
        let item = connector().parse_message(msg).expect("parsed");
        assert_eq!(item.sender, "noreply@winline.kz");
        assert_eq!(item.subject, "Ошибка STOPAZART");
        assert_eq!(item.body, "ID игрока: 111");
    }

    #[test]
    fn unparseable_timestamp_skips_the_single_item() {
        let msg = GraphMessage {
            id: "42".into(),
            created_date_time: "not-a-date".into(),
            body: None,
        };
        assert!(connector().parse_message(msg).is_none());
    }
}
