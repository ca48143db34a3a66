// tests/common/mod.rs
// Shared mock collaborators for integration tests: a transport that records
// every call, scripted source/news connectors, and a fixed summarizer.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::TimeZone;
use teams_alert_relay::config::RelayConfig;
use teams_alert_relay::context::Ctx;
use teams_alert_relay::ingest::{RawItem, SourceConnector};
use teams_alert_relay::news::{NewsSource, RawNewsItem};
use teams_alert_relay::notify::{InlineButton, MessageRef, Transport};
use teams_alert_relay::store::Store;
use teams_alert_relay::summarize::Summarizer;

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub destination: String,
    pub text: String,
    pub message_id: String,
}

#[derive(Debug, Clone)]
pub struct EditRecord {
    pub message: MessageRef,
    /// None for a controls-only edit.
    pub text: Option<String>,
    pub controls: Vec<InlineButton>,
}

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<SentMessage>>,
    pub edits: Mutex<Vec<EditRecord>>,
    pub fail_sends: AtomicBool,
    next_id: AtomicI64,
}

impl RecordingTransport {
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.text.clone()).collect()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        destination: &str,
        text: &str,
        _controls: &[InlineButton],
    ) -> Result<MessageRef> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("transport down"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let msg = SentMessage {
            destination: destination.to_string(),
            text: text.to_string(),
            message_id: id.to_string(),
        };
        self.sent.lock().unwrap().push(msg);
        Ok(MessageRef {
            chat_id: destination.to_string(),
            message_id: id.to_string(),
        })
    }

    async fn edit(
        &self,
        message: &MessageRef,
        text: &str,
        controls: &[InlineButton],
    ) -> Result<()> {
        self.edits.lock().unwrap().push(EditRecord {
            message: message.clone(),
            text: Some(text.to_string()),
            controls: controls.to_vec(),
        });
        Ok(())
    }

    async fn edit_controls(&self, message: &MessageRef, controls: &[InlineButton]) -> Result<()> {
        self.edits.lock().unwrap().push(EditRecord {
            message: message.clone(),
            text: None,
            controls: controls.to_vec(),
        });
        Ok(())
    }
}

pub struct ScriptedSource {
    pub items: Mutex<Vec<RawItem>>,
}

impl ScriptedSource {
    pub fn new(items: Vec<RawItem>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }
}

#[async_trait::async_trait]
impl SourceConnector for ScriptedSource {
    async fn fetch(&self, _since_cursor: Option<&str>) -> Result<Vec<RawItem>> {
        Ok(self.items.lock().unwrap().clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct ScriptedNews {
    pub items: Vec<RawNewsItem>,
    pub content: HashMap<String, String>,
}

#[async_trait::async_trait]
impl NewsSource for ScriptedNews {
    fn name(&self) -> &'static str {
        "portal"
    }

    async fn list(&self) -> Result<Vec<RawNewsItem>> {
        Ok(self.items.clone())
    }

    async fn fetch_content(&self, url: &str) -> Result<String> {
        self.content
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no content for {url}"))
    }
}

/// Summarizer returning a canned string, or failing when none is set.
pub struct FixedSummarizer(pub Option<String>);

#[async_trait::async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, _text: &str) -> Result<String> {
        self.0.clone().ok_or_else(|| anyhow!("summarizer down"))
    }

    fn provider_name(&self) -> &'static str {
        "fixed"
    }
}

pub struct TestHarness {
    pub ctx: Ctx,
    pub transport: Arc<RecordingTransport>,
    pub source: Arc<ScriptedSource>,
}

pub fn harness(
    source: ScriptedSource,
    news: ScriptedNews,
    summarizer: FixedSummarizer,
) -> TestHarness {
    let transport = Arc::new(RecordingTransport::default());
    let source = Arc::new(source);
    let store = Arc::new(Store::in_memory().expect("in-memory store"));
    let ctx = Ctx::new(
        RelayConfig::default(),
        store,
        transport.clone(),
        Arc::new(summarizer),
        source.clone(),
        Arc::new(news),
        "chat-1".to_string(),
    )
    .expect("build ctx");
    TestHarness {
        ctx,
        transport,
        source,
    }
}

pub fn empty_news() -> ScriptedNews {
    ScriptedNews {
        items: Vec::new(),
        content: HashMap::new(),
    }
}

pub fn raw_item(id: &str, sender: &str, subject: &str, body: &str) -> RawItem {
    // distinct per-id minutes so rendered alert texts never collide
    let minute: u32 = id.parse::<u32>().unwrap_or(0) % 60;
    raw_item_at(
        id,
        sender,
        subject,
        body,
        chrono::Utc.with_ymd_and_hms(2026, 8, 7, 9, minute, 0).unwrap(),
    )
}

pub fn raw_item_at(
    id: &str,
    sender: &str,
    subject: &str,
    body: &str,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> RawItem {
    RawItem {
        id: id.to_string(),
        sender: sender.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        timestamp,
    }
}
