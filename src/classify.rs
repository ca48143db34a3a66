// src/classify.rs
// Labels an ingested item as alert or informational, and for alerts derives a
// category and an embedded identifier from an ordered rule table. Rule order
// is significant: subjects can satisfy several patterns and the first match
// wins.

use anyhow::Context;
use regex::Regex;

use crate::config::{AlertConfig, CategoryRule};

pub const DEFAULT_CATEGORY: &str = "Other";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_alert: bool,
    pub is_reply: bool,
    /// Subject with any reply prefix stripped.
    pub subject: String,
    pub category: String,
    pub embedded_id: Option<String>,
}

struct CompiledRule {
    subject_contains: String,
    category: String,
    id_re: Regex,
}

pub struct Classifier {
    system_sender: String,
    keywords: Vec<String>,
    rules: Vec<CompiledRule>,
}

impl Classifier {
    pub fn from_config(alert: &AlertConfig, rules: &[CategoryRule]) -> anyhow::Result<Self> {
        let compiled = rules
            .iter()
            .map(|r| {
                Ok(CompiledRule {
                    subject_contains: r.subject_contains.clone(),
                    category: r.category.clone(),
                    id_re: Regex::new(&r.id_pattern)
                        .with_context(|| format!("id_pattern for category {}", r.category))?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            system_sender: alert.system_sender.to_lowercase(),
            keywords: alert
                .severity_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            rules: compiled,
        })
    }

    pub fn classify(&self, sender: &str, subject: &str, body: &str) -> Classification {
        let (subject, is_reply) = strip_reply_prefix(subject);

        let haystack = format!("{subject} {body}").to_lowercase();
        let is_alert = sender.trim().to_lowercase() == self.system_sender
            && self.keywords.iter().any(|k| haystack.contains(k));

        let (category, embedded_id) = if is_alert {
            self.match_rule(&subject, body)
        } else {
            (DEFAULT_CATEGORY.to_string(), None)
        };

        Classification {
            is_alert,
            is_reply,
            subject,
            category,
            embedded_id,
        }
    }

    /// First rule whose pattern occurs in the subject wins; no match yields
    /// the default category with no id.
    fn match_rule(&self, subject: &str, body: &str) -> (String, Option<String>) {
        for rule in &self.rules {
            if subject.contains(&rule.subject_contains) {
                let id = rule
                    .id_re
                    .captures(body)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                return (rule.category.clone(), id);
            }
        }
        (DEFAULT_CATEGORY.to_string(), None)
    }
}

fn strip_reply_prefix(subject: &str) -> (String, bool) {
    let trimmed = subject.trim();
    match trimmed.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("re:") => {
            (trimmed[3..].trim().to_string(), true)
        }
        _ => (trimmed.to_string(), false),
    }
}
