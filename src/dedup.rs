// src/dedup.rs
// Subject-level dedup guard: the first occurrence of a category key in an
// epoch notifies immediately, every later one is folded into the aggregation
// window. The epoch is a calendar day in the display offset, reset wholesale
// rather than per-key, so a still-failing alert legitimately re-fires once per
// day.

use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::store::Store;

pub struct DedupGuard {
    store: Arc<Store>,
    offset: FixedOffset,
}

impl DedupGuard {
    pub fn new(store: Arc<Store>, offset: FixedOffset) -> Self {
        Self { store, offset }
    }

    /// True only if `category` has not alerted in the current epoch. The
    /// caller notifies and then calls `mark_seen`; state is updated explicitly
    /// after the send, not here.
    pub fn should_notify_immediately(&self, category: &str) -> Result<bool> {
        Ok(!self.store.is_seen(category)?)
    }

    pub fn mark_seen(&self, category: &str) -> Result<()> {
        self.store.mark_seen(category)
    }

    /// Clears the whole seen set when the calendar day (display offset) has
    /// moved past the stored epoch. Returns the number of cleared keys when a
    /// reset happened.
    pub fn reset_epoch_if_due(&self, now: DateTime<Utc>) -> Result<Option<usize>> {
        let today = self.epoch_date(now);
        if self.store.seen_epoch()?.as_deref() == Some(today.as_str()) {
            return Ok(None);
        }
        let cleared = self.store.reset_seen(&today)?;
        Ok(Some(cleared))
    }

    fn epoch_date(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.offset).format("%Y-%m-%d").to_string()
    }
}
