// src/store.rs
// Single embedded SQLite store behind one write connection. Every stateful
// record of the pipeline lives here (cursor, seen keys, pending occurrences,
// summaries, sent fingerprints, news items) so restart-safety does not depend
// on process lifetime. The Mutex serializes conflicting writers; the two
// atomicity points (fingerprint insert, flush clear-on-success) are a single
// statement and a single transaction respectively.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{RelayError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

-- "already alerted in this epoch" category keys; wiped wholesale on reset
CREATE TABLE IF NOT EXISTS seen_keys (
  category TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS pending_occurrences (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  category TEXT NOT NULL,
  embedded_id TEXT,
  subject TEXT NOT NULL,
  occurred_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS summaries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  chat_id TEXT NOT NULL,
  message_id TEXT NOT NULL,
  summary_text TEXT NOT NULL,
  details_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_summaries_created ON summaries(created_at);

CREATE TABLE IF NOT EXISTS sent_fingerprints (
  destination TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  created_at TEXT NOT NULL,
  PRIMARY KEY (destination, content_hash)
);

CREATE TABLE IF NOT EXISTS news_items (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  source TEXT NOT NULL,
  external_id TEXT NOT NULL,
  title TEXT NOT NULL,
  raw_date TEXT NOT NULL,
  url TEXT NOT NULL,
  content TEXT NOT NULL,
  summary TEXT NOT NULL,
  planned_at TEXT NOT NULL,
  posted INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  UNIQUE (source, external_id)
);
CREATE INDEX IF NOT EXISTS idx_news_due ON news_items(posted, planned_at);
"#;

const KV_CURSOR: &str = "cursor";
const KV_SEEN_EPOCH: &str = "seen_epoch";

/// One repeat occurrence accumulated between aggregation triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOccurrence {
    pub category: String,
    pub embedded_id: Option<String>,
    pub subject: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub id: i64,
    pub chat_id: String,
    pub message_id: String,
    pub summary_text: String,
    pub details_json: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNewsItem {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub raw_date: String,
    pub url: String,
    pub content: String,
    pub summary: String,
    pub planned_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewsRow {
    pub id: i64,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub planned_at: DateTime<Utc>,
    pub posted: bool,
}

pub struct Store {
    conn: Mutex<Connection>,
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    // ---- kv helpers ----

    fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let v = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(v)
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ---- cursor tracker ----

    pub fn load_cursor(&self) -> Result<Option<String>> {
        self.kv_get(KV_CURSOR)
    }

    /// Persist `new_cursor` only if it compares greater than the stored value
    /// (or none is stored). Returns whether the cursor moved.
    pub fn advance_cursor(&self, new_cursor: &str) -> Result<bool> {
        let conn = self.conn();
        let current: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [KV_CURSOR], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(cur) = &current {
            if new_cursor <= cur.as_str() {
                return Ok(false);
            }
        }
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![KV_CURSOR, new_cursor],
        )?;
        Ok(true)
    }

    // ---- seen-key set (dedup epoch) ----

    pub fn is_seen(&self, category: &str) -> Result<bool> {
        let conn = self.conn();
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM seen_keys WHERE category = ?1",
                [category],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn mark_seen(&self, category: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO seen_keys (category) VALUES (?1)",
            [category],
        )?;
        Ok(())
    }

    pub fn seen_epoch(&self) -> Result<Option<String>> {
        self.kv_get(KV_SEEN_EPOCH)
    }

    /// Clear the whole set and stamp the new epoch date in one transaction.
    pub fn reset_seen(&self, epoch_date: &str) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let cleared = tx.execute("DELETE FROM seen_keys", [])?;
        tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![KV_SEEN_EPOCH, epoch_date],
        )?;
        tx.commit()?;
        Ok(cleared)
    }

    // ---- pending occurrences ----

    pub fn record_pending(&self, occ: &PendingOccurrence) -> Result<()> {
        self.conn().execute(
            "INSERT INTO pending_occurrences (category, embedded_id, subject, occurred_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                occ.category,
                occ.embedded_id,
                occ.subject,
                occ.occurred_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// All pending occurrences plus the max rowid of the snapshot, so a flush
    /// can later clear exactly what it rendered.
    pub fn load_pending(&self) -> Result<(Vec<PendingOccurrence>, i64)> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, category, embedded_id, subject, occurred_at
             FROM pending_occurrences ORDER BY id",
        )?;
        let mut max_id = 0i64;
        let mut out = Vec::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                PendingOccurrence {
                    category: row.get(1)?,
                    embedded_id: row.get(2)?,
                    subject: row.get(3)?,
                    occurred_at: parse_ts(&row.get::<_, String>(4)?),
                },
            ))
        })?;
        for row in rows {
            let (id, occ) = row?;
            max_id = max_id.max(id);
            out.push(occ);
        }
        Ok((out, max_id))
    }

    /// Persist a flushed summary and clear the pending rows it covered, in one
    /// transaction. Occurrences recorded after the snapshot survive.
    pub fn insert_summary_and_clear_pending(
        &self,
        chat_id: &str,
        message_id: &str,
        summary_text: &str,
        details_json: &str,
        created_at: DateTime<Utc>,
        max_pending_id: i64,
    ) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO summaries (chat_id, message_id, summary_text, details_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chat_id,
                message_id,
                summary_text,
                details_json,
                created_at.to_rfc3339()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "DELETE FROM pending_occurrences WHERE id <= ?1",
            [max_pending_id],
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_summary(&self, id: i64) -> Result<SummaryRow> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, chat_id, message_id, summary_text, details_json, created_at
             FROM summaries WHERE id = ?1",
            [id],
            |row| {
                Ok(SummaryRow {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    message_id: row.get(2)?,
                    summary_text: row.get(3)?,
                    details_json: row.get(4)?,
                    created_at: parse_ts(&row.get::<_, String>(5)?),
                })
            },
        )
        .optional()?
        .ok_or(RelayError::StaleReference(id))
    }

    pub fn purge_summaries_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let n = self.conn().execute(
            "DELETE FROM summaries WHERE created_at < ?1",
            [cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }

    // ---- sent fingerprints ----

    /// Claim a (destination, hash) pair. `false` means the pair already
    /// existed and the caller must skip the send. INSERT OR IGNORE makes the
    /// check-and-claim a single atomic statement.
    pub fn try_insert_fingerprint(
        &self,
        destination: &str,
        content_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let n = self.conn().execute(
            "INSERT OR IGNORE INTO sent_fingerprints (destination, content_hash, created_at)
             VALUES (?1, ?2, ?3)",
            params![destination, content_hash, now.to_rfc3339()],
        )?;
        Ok(n == 1)
    }

    // ---- news items ----

    pub fn news_exists(&self, source: &str, external_id: &str) -> Result<bool> {
        let conn = self.conn();
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM news_items WHERE source = ?1 AND external_id = ?2",
                params![source, external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Returns `false` when a row for (source, external_id) already exists.
    pub fn insert_news(&self, item: &NewNewsItem, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn().execute(
            "INSERT OR IGNORE INTO news_items
               (source, external_id, title, raw_date, url, content, summary,
                planned_at, posted, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
            params![
                item.source,
                item.external_id,
                item.title,
                item.raw_date,
                item.url,
                item.content,
                item.summary,
                item.planned_at.to_rfc3339(),
                now.to_rfc3339()
            ],
        )?;
        Ok(n == 1)
    }

    /// Unposted items whose planned execution instant has already passed.
    pub fn due_news(&self, now: DateTime<Utc>) -> Result<Vec<NewsRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, source, external_id, title, url, summary, planned_at, posted
             FROM news_items WHERE posted = 0 AND planned_at <= ?1 ORDER BY planned_at",
        )?;
        let rows = stmt.query_map([now.to_rfc3339()], |row| {
            Ok(NewsRow {
                id: row.get(0)?,
                source: row.get(1)?,
                external_id: row.get(2)?,
                title: row.get(3)?,
                url: row.get(4)?,
                summary: row.get(5)?,
                planned_at: parse_ts(&row.get::<_, String>(6)?),
                posted: row.get::<_, i64>(7)? != 0,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The false -> true transition; never reversed.
    pub fn mark_news_posted(&self, id: i64) -> Result<()> {
        self.conn()
            .execute("UPDATE news_items SET posted = 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn purge_news_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let n = self.conn().execute(
            "DELETE FROM news_items WHERE created_at < ?1",
            [cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, h, 0, 0).unwrap()
    }

    #[test]
    fn cursor_never_regresses() {
        let store = Store::in_memory().unwrap();
        assert_eq!(store.load_cursor().unwrap(), None);
        assert!(store.advance_cursor("100").unwrap());
        assert!(!store.advance_cursor("050").unwrap());
        assert!(!store.advance_cursor("100").unwrap());
        assert!(store.advance_cursor("101").unwrap());
        assert_eq!(store.load_cursor().unwrap().as_deref(), Some("101"));
    }

    #[test]
    fn seen_keys_reset_wholesale() {
        let store = Store::in_memory().unwrap();
        store.mark_seen("STOPAZART").unwrap();
        store.mark_seen("SmartBridge").unwrap();
        assert!(store.is_seen("STOPAZART").unwrap());
        let cleared = store.reset_seen("2026-08-08").unwrap();
        assert_eq!(cleared, 2);
        assert!(!store.is_seen("STOPAZART").unwrap());
        assert_eq!(store.seen_epoch().unwrap().as_deref(), Some("2026-08-08"));
    }

    #[test]
    fn fingerprint_claim_is_once_per_destination() {
        let store = Store::in_memory().unwrap();
        assert!(store.try_insert_fingerprint("chat-1", "abc", ts(10)).unwrap());
        assert!(!store.try_insert_fingerprint("chat-1", "abc", ts(11)).unwrap());
        // same hash, other destination: independent
        assert!(store.try_insert_fingerprint("chat-2", "abc", ts(11)).unwrap());
    }

    #[test]
    fn flush_clears_only_snapshotted_pending() {
        let store = Store::in_memory().unwrap();
        let occ = |cat: &str| PendingOccurrence {
            category: cat.to_string(),
            embedded_id: Some("1".into()),
            subject: cat.to_string(),
            occurred_at: ts(9),
        };
        store.record_pending(&occ("A")).unwrap();
        store.record_pending(&occ("B")).unwrap();
        let (pending, max_id) = store.load_pending().unwrap();
        assert_eq!(pending.len(), 2);

        // a late occurrence arrives between snapshot and clear
        store.record_pending(&occ("C")).unwrap();

        let id = store
            .insert_summary_and_clear_pending("chat", "msg", "text", "[]", ts(10), max_id)
            .unwrap();
        assert!(id > 0);
        let (left, _) = store.load_pending().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].category, "C");
    }

    #[test]
    fn stale_summary_lookup_is_typed() {
        let store = Store::in_memory().unwrap();
        match store.get_summary(42) {
            Err(RelayError::StaleReference(42)) => {}
            other => panic!("expected StaleReference, got {other:?}"),
        }
    }

    #[test]
    fn news_unique_per_source_and_external_id() {
        let store = Store::in_memory().unwrap();
        let item = NewNewsItem {
            source: "portal".into(),
            external_id: "n-1".into(),
            title: "Maintenance".into(),
            raw_date: "07.08.2026".into(),
            url: "https://example.org/n-1".into(),
            content: "from 10:00 to 12:00 on 07.08.2026".into(),
            summary: "short".into(),
            planned_at: ts(7),
        };
        assert!(store.insert_news(&item, ts(6)).unwrap());
        assert!(!store.insert_news(&item, ts(6)).unwrap());
        assert!(store.news_exists("portal", "n-1").unwrap());

        let due = store.due_news(ts(8)).unwrap();
        assert_eq!(due.len(), 1);
        store.mark_news_posted(due[0].id).unwrap();
        assert!(store.due_news(ts(9)).unwrap().is_empty());
    }
}
