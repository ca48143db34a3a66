// src/config.rs
// Layered configuration: secrets/endpoints come from the environment (.env in
// dev), tunable pipeline rules come from a TOML file with embedded defaults.

use anyhow::Context;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";
pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";

fn default_window_days() -> i64 {
    3
}
fn default_date_format() -> String {
    "%d.%m.%Y".to_string()
}
fn default_schedule_pattern() -> String {
    // "from HH:MM to HH:MM on DD.MM.YYYY"; groups: start, end, date
    r"(?i)from\s+(\d{1,2}:\d{2})\s+to\s+(\d{1,2}:\d{2})\s+on\s+(\d{2}\.\d{2}\.\d{4})".to_string()
}
fn default_utc_offset_hours() -> i32 {
    3
}
fn default_retention_days() -> i64 {
    90
}

/// Who counts as the system sender and which words mark an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub system_sender: String,
    pub severity_keywords: Vec<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            system_sender: "noreply@winline.kz".to_string(),
            severity_keywords: [
                "ошибка",
                "оповещение",
                "error",
                "fail",
                "exception",
                "critical",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// One ordered classification rule. First match wins, so rule order in the
/// file is significant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Substring looked up in the subject.
    pub subject_contains: String,
    pub category: String,
    /// Regex run against the body; capture group 1 is the embedded id.
    pub id_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    /// Items dated outside [today, today + window_days] are discarded.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Time-range pattern locating the planned execution window inside the
    /// content. Groups: 1 = start HH:MM, 2 = end HH:MM, 3 = DD.MM.YYYY.
    #[serde(default = "default_schedule_pattern")]
    pub schedule_pattern: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            date_format: default_date_format(),
            schedule_pattern: default_schedule_pattern(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub ingest_secs: u64,
    pub flush_secs: u64,
    pub epoch_check_secs: u64,
    pub news_ingest_secs: u64,
    pub news_tick_secs: u64,
    pub purge_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ingest_secs: 60,
            flush_secs: 3_600,
            epoch_check_secs: 60,
            news_ingest_secs: 1_800,
            news_tick_secs: 300,
            purge_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub summary_days: i64,
    #[serde(default = "default_retention_days")]
    pub news_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            summary_days: default_retention_days(),
            news_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default = "default_rules")]
    pub rule: Vec<CategoryRule>,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Fixed offset used for all user-facing timestamps and the epoch day.
    #[serde(default = "default_utc_offset_hours")]
    pub display_utc_offset_hours: i32,
}

fn default_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule {
            subject_contains: "STOPAZART".to_string(),
            category: "STOPAZART".to_string(),
            id_pattern: r"(?i)id игрока[:\s]*([0-9]+)".to_string(),
        },
        CategoryRule {
            subject_contains: "SmartBridge".to_string(),
            category: "SmartBridge".to_string(),
            id_pattern: r"(?i)номер транзакции\s*([0-9]+)".to_string(),
        },
        CategoryRule {
            subject_contains: "реестре должников".to_string(),
            category: "Реестр должников".to_string(),
            id_pattern: r"(?i)id игрока[:\s]*([0-9]+)".to_string(),
        },
    ]
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            alert: AlertConfig::default(),
            rule: default_rules(),
            news: NewsConfig::default(),
            schedule: ScheduleConfig::default(),
            retention: RetentionConfig::default(),
            display_utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

impl RelayConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let mut cfg: RelayConfig = toml::from_str(s).context("parse relay config TOML")?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load from `path`; a missing file yields the embedded defaults so the
    /// relay runs unconfigured.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(s) => match Self::from_toml_str(&s) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(error = ?e, "relay config unreadable, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    fn sanitize(&mut self) {
        if self.news.window_days < 0 {
            self.news.window_days = default_window_days();
        }
        if self.retention.summary_days <= 0 {
            self.retention.summary_days = default_retention_days();
        }
        if self.retention.news_days <= 0 {
            self.retention.news_days = default_retention_days();
        }
        if !(-23..=23).contains(&self.display_utc_offset_hours) {
            self.display_utc_offset_hours = default_utc_offset_hours();
        }
    }

    pub fn display_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.display_utc_offset_hours * 3_600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_ordered_rules() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.rule[0].category, "STOPAZART");
        assert_eq!(cfg.rule.len(), 3);
        assert_eq!(cfg.news.window_days, 3);
    }

    #[test]
    fn toml_overrides_and_sanitizes() {
        let cfg = RelayConfig::from_toml_str(
            r#"
            display_utc_offset_hours = 99

            [[rule]]
            subject_contains = "Billing"
            category = "Billing"
            id_pattern = "invoice ([0-9]+)"

            [retention]
            summary_days = -1
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.rule.len(), 1);
        assert_eq!(cfg.rule[0].category, "Billing");
        assert_eq!(cfg.display_utc_offset_hours, 3);
        assert_eq!(cfg.retention.summary_days, 90);
    }
}
