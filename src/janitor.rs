// src/janitor.rs
// Retention: reclaims summaries and news items past their horizons. Never
// touches the cursor or the seen-key set; a failure here is logged by the
// caller and blocks nothing.

use chrono::{Duration, Utc};

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub summaries: usize,
    pub news: usize,
}

pub fn purge_once(store: &Store, retention: &RetentionConfig) -> Result<PurgeReport> {
    let now = Utc::now();
    let summaries =
        store.purge_summaries_before(now - Duration::days(retention.summary_days))?;
    let news = store.purge_news_before(now - Duration::days(retention.news_days))?;
    Ok(PurgeReport { summaries, news })
}
