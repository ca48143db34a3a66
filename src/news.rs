// src/news.rs
// Secondary, lower-frequency source: announcement pages. Ingest keeps only
// items dated inside a bounded future window and schedulable to a concrete
// instant; the deferred tick posts each retained item once its window opens.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::config::NewsConfig;
use crate::context::Ctx;
use crate::error::{RelayError, Result};
use crate::notify::guard::Dispatch;
use crate::store::{NewNewsItem, NewsRow};
use crate::summarize::excerpt;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("news_listed_total", "Announcement items listed by the connector.");
        describe_counter!("news_inserted_total", "Items retained and persisted unposted.");
        describe_counter!("news_discarded_total", "Items outside the window or unschedulable.");
        describe_counter!("news_posted_total", "Deferred items posted by the tick.");
    });
}

/// Raw item as scraped from an announcement listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNewsItem {
    pub external_id: String,
    pub title: String,
    pub raw_date: String,
    pub url: String,
}

#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn list(&self) -> anyhow::Result<Vec<RawNewsItem>>;
    async fn fetch_content(&self, url: &str) -> anyhow::Result<String>;
}

/// Compiled window/schedule rules shared by every ingest tick.
pub struct NewsFilter {
    window_days: i64,
    date_format: String,
    schedule_re: Regex,
    offset: FixedOffset,
}

impl NewsFilter {
    pub fn from_config(cfg: &NewsConfig, offset: FixedOffset) -> anyhow::Result<Self> {
        Ok(Self {
            window_days: cfg.window_days,
            date_format: cfg.date_format.clone(),
            schedule_re: Regex::new(&cfg.schedule_pattern)
                .map_err(|e| anyhow::anyhow!("news schedule_pattern: {e}"))?,
            offset,
        })
    }

    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(raw.trim(), &self.date_format).ok()
    }

    /// `[today, today + window_days]` inclusive.
    pub fn in_window(&self, date: NaiveDate, today: NaiveDate) -> bool {
        date >= today && date <= today + Duration::days(self.window_days)
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Locate the planned execution window in the content; the instant is the
    /// start of the range, interpreted in the display offset. None means the
    /// item cannot be scheduled safely.
    pub fn extract_planned_instant(&self, content: &str) -> Option<DateTime<Utc>> {
        let caps = self.schedule_re.captures(content)?;
        let start = NaiveTime::parse_from_str(caps.get(1)?.as_str(), "%H:%M").ok()?;
        let date = NaiveDate::parse_from_str(caps.get(3)?.as_str(), &self.date_format).ok()?;
        let local = self.offset.from_local_datetime(&date.and_time(start)).single()?;
        Some(local.with_timezone(&Utc))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NewsIngestReport {
    pub listed: usize,
    pub inserted: usize,
    pub discarded: usize,
    pub malformed: usize,
}

/// Freshly scraped items: window-filter, dedupe by (source, externalId),
/// fetch content, summarize best-effort, extract the planned instant, and
/// persist unposted. A malformed item is skipped and logged; the rest of the
/// batch proceeds.
pub async fn ingest_once(ctx: &Ctx) -> Result<NewsIngestReport> {
    ensure_metrics_described();

    let source = ctx.news_source.as_ref();
    let items = source
        .list()
        .await
        .map_err(RelayError::TransientSource)?;

    let now = Utc::now();
    let today = ctx.news_filter.today(now);
    let mut report = NewsIngestReport {
        listed: items.len(),
        ..Default::default()
    };
    counter!("news_listed_total").increment(items.len() as u64);

    for item in items {
        let Some(date) = ctx.news_filter.parse_date(&item.raw_date) else {
            report.malformed += 1;
            tracing::warn!(source = source.name(), id = %item.external_id, raw = %item.raw_date, "news date unparseable, skipped");
            continue;
        };
        if !ctx.news_filter.in_window(date, today) {
            report.discarded += 1;
            counter!("news_discarded_total").increment(1);
            continue;
        }
        if ctx.store.news_exists(source.name(), &item.external_id)? {
            continue;
        }

        let content = match source.fetch_content(&item.url).await {
            Ok(c) => c,
            Err(e) => {
                // not persisted, so the next ingest retries this item
                tracing::warn!(error = ?e, id = %item.external_id, "news content fetch failed");
                continue;
            }
        };

        let summary = match ctx.summarizer.summarize(&content).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = ?e, id = %item.external_id, "news summarizer degraded to excerpt");
                excerpt(&content, 300)
            }
        };

        let Some(planned_at) = ctx.news_filter.extract_planned_instant(&content) else {
            report.discarded += 1;
            counter!("news_discarded_total").increment(1);
            tracing::info!(id = %item.external_id, "no execution window in content, discarded");
            continue;
        };

        let inserted = ctx.store.insert_news(
            &NewNewsItem {
                source: source.name().to_string(),
                external_id: item.external_id.clone(),
                title: item.title.clone(),
                raw_date: item.raw_date.clone(),
                url: item.url.clone(),
                content,
                summary,
                planned_at,
            },
            now,
        )?;
        if inserted {
            report.inserted += 1;
            counter!("news_inserted_total").increment(1);
        }
    }
    Ok(report)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NewsTickReport {
    pub due: usize,
    pub posted: usize,
    pub skipped: usize,
}

/// Deferred trigger: post every unposted item whose planned instant has
/// passed. Only a real send flips `posted`; a duplicate-content skip leaves
/// the row for inspection and an errored send is retried next tick. Safe to
/// call repeatedly: posted items fall out of the selection predicate.
pub async fn tick_once(ctx: &Ctx) -> Result<NewsTickReport> {
    ensure_metrics_described();

    let now = Utc::now();
    let due = ctx.store.due_news(now)?;
    let mut report = NewsTickReport {
        due: due.len(),
        ..Default::default()
    };

    for row in due {
        let text = render_news(&row, ctx.news_filter.offset());
        match ctx.guard.dispatch(&ctx.destination, &text, &[]).await {
            Ok(Dispatch::Sent(_)) => {
                ctx.store.mark_news_posted(row.id)?;
                report.posted += 1;
                counter!("news_posted_total").increment(1);
            }
            Ok(Dispatch::Skipped) => {
                report.skipped += 1;
                tracing::warn!(id = row.id, "news dispatch suppressed as duplicate, left unposted");
            }
            Err(e) => {
                tracing::warn!(error = ?e, id = row.id, "news dispatch failed, retried next tick");
            }
        }
    }
    Ok(report)
}

/// Announcement connector over a JSON listing endpoint:
/// `[{"id", "title", "date", "url"}, ...]`. Content pages are fetched as-is
/// and stripped of markup; site-specific scraping stays outside this crate.
pub struct JsonFeedSource {
    url: String,
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl JsonFeedSource {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            timeout: std::time::Duration::from_secs(15),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct FeedEntry {
    id: String,
    title: String,
    date: String,
    url: String,
}

#[async_trait::async_trait]
impl NewsSource for JsonFeedSource {
    fn name(&self) -> &'static str {
        "feed"
    }

    async fn list(&self) -> anyhow::Result<Vec<RawNewsItem>> {
        use anyhow::Context as _;
        let entries: Vec<FeedEntry> = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .context("feed get")?
            .error_for_status()
            .context("feed non-2xx")?
            .json()
            .await
            .context("feed body")?;
        Ok(entries
            .into_iter()
            .map(|e| RawNewsItem {
                external_id: e.id,
                title: e.title,
                raw_date: e.date,
                url: e.url,
            })
            .collect())
    }

    async fn fetch_content(&self, url: &str) -> anyhow::Result<String> {
        use anyhow::Context as _;
        let body = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .context("content get")?
            .error_for_status()
            .context("content non-2xx")?
            .text()
            .await
            .context("content body")?;
        Ok(crate::ingest::teams::strip_html(&body))
    }
}

/// No-op source used when no feed is configured.
pub struct DisabledNewsSource;

#[async_trait::async_trait]
impl NewsSource for DisabledNewsSource {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn list(&self) -> anyhow::Result<Vec<RawNewsItem>> {
        Ok(Vec::new())
    }

    async fn fetch_content(&self, _url: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

pub fn render_news(row: &NewsRow, offset: FixedOffset) -> String {
    let when = row.planned_at.with_timezone(&offset).format("%d.%m.%Y %H:%M");
    format!(
        "📣 *{title}*\n\n{summary}\n\n🕒 Scheduled: {when}\n{url}",
        title = row.title,
        summary = row.summary,
        url = row.url,
    )
}
