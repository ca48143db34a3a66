// src/aggregate.rs
// Accumulates repeat occurrences between triggers and, on the periodic flush,
// emits one collapsed Summary plus its serialized detail payload. The pending
// set is cleared only after a successful dispatch; a skipped or failed
// dispatch leaves it in place so the next trigger retries with the
// accumulated (possibly larger) set.

use chrono::{DateTime, FixedOffset, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::callback::expand_button;
use crate::classify::Classification;
use crate::error::Result;
use crate::notify::guard::{Dispatch, SendGuard};
use crate::notify::MessageRef;
use crate::store::{PendingOccurrence, Store};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("aggregate_recorded_total", "Occurrences folded into the window.");
        describe_counter!("aggregate_flushes_total", "Summaries emitted by the hourly flush.");
        describe_counter!(
            "aggregate_flush_retries_total",
            "Flushes left pending after a skipped or failed dispatch."
        );
    });
}

/// One drill-down line; serialized as JSON only at the storage boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetailEntry {
    pub category: String,
    pub embedded_id: Option<String>,
    pub subject: String,
    pub occurred_at: DateTime<Utc>,
}

pub struct Aggregator {
    store: Arc<Store>,
    offset: FixedOffset,
}

impl Aggregator {
    pub fn new(store: Arc<Store>, offset: FixedOffset) -> Self {
        Self { store, offset }
    }

    pub fn record(&self, cls: &Classification, occurred_at: DateTime<Utc>) -> Result<()> {
        ensure_metrics_described();
        self.store.record_pending(&PendingOccurrence {
            category: cls.category.clone(),
            embedded_id: cls.embedded_id.clone(),
            subject: cls.subject.clone(),
            occurred_at,
        })?;
        counter!("aggregate_recorded_total").increment(1);
        Ok(())
    }

    /// Periodic trigger. No pending occurrences means no Summary and no
    /// transport call at all. Returns the stored summary id when one was
    /// emitted.
    pub async fn flush(&self, guard: &SendGuard, destination: &str) -> Result<Option<i64>> {
        ensure_metrics_described();

        let (pending, max_id) = self.store.load_pending()?;
        if pending.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let text = render_collapsed(&pending, self.offset);
        let details: Vec<DetailEntry> = pending
            .iter()
            .map(|occ| DetailEntry {
                category: occ.category.clone(),
                embedded_id: occ.embedded_id.clone(),
                subject: occ.subject.clone(),
                occurred_at: occ.occurred_at,
            })
            .collect();
        let details_json =
            serde_json::to_string(&details).expect("detail entries serialize to JSON");

        let msg: MessageRef = match guard.dispatch(destination, &text, &[]).await? {
            Dispatch::Sent(msg) => msg,
            Dispatch::Skipped => {
                counter!("aggregate_flush_retries_total").increment(1);
                tracing::warn!(
                    occurrences = pending.len(),
                    "flush suppressed as duplicate content, pending kept for retry"
                );
                return Ok(None);
            }
        };

        let id = self.store.insert_summary_and_clear_pending(
            &msg.chat_id,
            &msg.message_id,
            &text,
            &details_json,
            now,
            max_id,
        )?;

        // The expand control can only reference the row id once it exists, so
        // the keyboard is attached by a follow-up edit.
        if let Err(e) = guard.transport().edit_controls(&msg, &[expand_button(id)]).await {
            tracing::warn!(error = ?e, summary_id = id, "attaching expand control failed");
        }

        counter!("aggregate_flushes_total").increment(1);
        tracing::info!(summary_id = id, occurrences = pending.len(), "summary flushed");
        Ok(Some(id))
    }
}

/// Collapsed view: one line per category with count and last-seen time in the
/// display offset.
pub fn render_collapsed(pending: &[PendingOccurrence], offset: FixedOffset) -> String {
    let mut grouped: BTreeMap<&str, (usize, DateTime<Utc>)> = BTreeMap::new();
    for occ in pending {
        let entry = grouped
            .entry(occ.category.as_str())
            .or_insert((0, occ.occurred_at));
        entry.0 += 1;
        if occ.occurred_at > entry.1 {
            entry.1 = occ.occurred_at;
        }
    }

    let mut out = String::from("🔍 *Alert summary for the last hour:*\n");
    for (category, (count, last)) in grouped {
        let last_local = last.with_timezone(&offset).format("%d.%m.%Y %H:%M");
        out.push_str(&format!(
            "📌 *{category}*: {count} (last seen {last_local})\n"
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn occ(category: &str, id: Option<&str>, hour: u32, minute: u32) -> PendingOccurrence {
        PendingOccurrence {
            category: category.to_string(),
            embedded_id: id.map(str::to_string),
            subject: format!("{category} failed"),
            occurred_at: Utc.with_ymd_and_hms(2026, 8, 7, hour, minute, 0).unwrap(),
        }
    }

    #[test]
    fn collapsed_render_counts_and_latest_timestamp() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let pending = vec![
            occ("STOPAZART", Some("111"), 10, 0),
            occ("STOPAZART", Some("222"), 12, 4),
            occ("SmartBridge", Some("9"), 11, 30),
        ];
        let text = render_collapsed(&pending, offset);
        // 12:04 UTC is 15:04 at UTC+3
        assert!(text.contains("*STOPAZART*: 2 (last seen 07.08.2026 15:04)"));
        assert!(text.contains("*SmartBridge*: 1 (last seen 07.08.2026 14:30)"));
    }

    #[test]
    fn detail_payload_round_trips_through_json() {
        let entry = DetailEntry {
            category: "STOPAZART".into(),
            embedded_id: Some("222".into()),
            subject: "Ошибка STOPAZART".into(),
            occurred_at: Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap(),
        };
        let json = serde_json::to_string(&vec![entry.clone()]).unwrap();
        let back: Vec<DetailEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![entry]);
    }
}
