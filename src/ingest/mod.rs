// src/ingest/mod.rs
pub mod teams;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;

use crate::context::Ctx;
use crate::error::{RelayError, Result};
use crate::summarize::excerpt;

/// One-time metrics registration (so series show up on an exporter).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Items fetched past the cursor.");
        describe_counter!("ingest_alerts_immediate_total", "Alerts notified immediately.");
        describe_counter!("ingest_alerts_aggregated_total", "Alerts folded into the window.");
        describe_counter!("ingest_digests_total", "Informational digests dispatched.");
    });
}

/// Raw item from the chat source, ordered ascending by id where possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait SourceConnector: Send + Sync {
    async fn fetch(&self, since_cursor: Option<&str>) -> anyhow::Result<Vec<RawItem>>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub immediate: usize,
    pub aggregated: usize,
    pub digest_sent: bool,
}

/// One ingestion poll: advance the cursor past the new batch, route alerts
/// through the dedup guard, digest the rest. A fetch failure aborts the tick
/// with the cursor untouched; a failed cursor advance aborts before anything
/// is marked ingested, so items are reprocessed rather than lost.
pub async fn run_once(ctx: &Ctx) -> Result<IngestReport> {
    ensure_metrics_described();

    let cursor = ctx.store.load_cursor()?;
    let items = ctx
        .source
        .fetch(cursor.as_deref())
        .await
        .map_err(RelayError::TransientSource)?;

    let mut fresh: Vec<RawItem> = items
        .into_iter()
        .filter(|item| cursor.as_deref().is_none_or(|c| item.id.as_str() > c))
        .collect();
    fresh.sort_by(|a, b| a.id.cmp(&b.id));

    let mut report = IngestReport::default();
    let Some(last) = fresh.last() else {
        return Ok(report);
    };
    ctx.store.advance_cursor(&last.id)?;

    report.fetched = fresh.len();
    counter!("ingest_items_total").increment(fresh.len() as u64);

    let mut informational = Vec::new();
    for item in &fresh {
        let cls = ctx.classifier.classify(&item.sender, &item.subject, &item.body);
        if !cls.is_alert {
            informational.push((item, cls));
            continue;
        }

        if ctx.dedup.should_notify_immediately(&cls.category)? {
            let when = item
                .timestamp
                .with_timezone(&ctx.cfg.display_offset())
                .format("%d.%m.%Y %H:%M")
                .to_string();
            let text = render_immediate(&cls.category, &cls.subject, &when);
            match ctx.guard.dispatch(&ctx.destination, &text, &[]).await {
                Ok(_) => {
                    // Skipped also counts: identical content already alerted today.
                    ctx.dedup.mark_seen(&cls.category)?;
                    report.immediate += 1;
                    counter!("ingest_alerts_immediate_total").increment(1);
                }
                Err(e) => {
                    tracing::warn!(error = ?e, category = %cls.category, "immediate alert failed");
                }
            }
        } else {
            ctx.aggregator.record(&cls, item.timestamp)?;
            report.aggregated += 1;
            counter!("ingest_alerts_aggregated_total").increment(1);
        }
    }

    if !informational.is_empty() {
        report.digest_sent = send_digest(ctx, &informational).await;
    }
    Ok(report)
}

// The occurrence time is part of the text so the content fingerprint tells a
// genuine re-fire (next epoch) apart from a reprocessed batch of the same
// item, which must stay suppressed.
fn render_immediate(category: &str, subject: &str, when: &str) -> String {
    format!("❗ *New alert* [{category}]\n📌 *Subject:* {subject}\n🕒 {when}")
}

/// Batch the informational items into one digest. Summarization is
/// best-effort: on failure each item degrades to an excerpt.
async fn send_digest(ctx: &Ctx, items: &[(&RawItem, crate::classify::Classification)]) -> bool {
    let block = items
        .iter()
        .map(|(item, cls)| {
            let reply = if cls.is_reply {
                "\nType: reply (subject taken from the previous message)"
            } else {
                ""
            };
            format!(
                "ID: {}\nFrom: {}\nSubject: {}{}\nText: {}",
                item.id, item.sender, cls.subject, reply, item.body
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let summary = match ctx.summarizer.summarize(&block).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = ?e, provider = ctx.summarizer.provider_name(), "summarizer degraded to excerpts");
            items
                .iter()
                .map(|(item, cls)| format!("• {}: {}", cls.subject, excerpt(&item.body, 200)))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    let text = format!("📝 *Channel digest:*\n\n{summary}");
    match ctx.guard.dispatch(&ctx.destination, &text, &[]).await {
        Ok(_) => {
            counter!("ingest_digests_total").increment(1);
            true
        }
        Err(e) => {
            tracing::warn!(error = ?e, "digest dispatch failed");
            false
        }
    }
}
