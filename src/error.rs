// src/error.rs
// Failure classes visible to the pipeline. A duplicate-content skip is a
// normal `Dispatch::Skipped` outcome, not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Network/API failure fetching items. The tick aborts, the cursor stays
    /// put, and the next tick retries the same range.
    #[error("source fetch failed: {0:#}")]
    TransientSource(anyhow::Error),

    /// Store write/read failure. Callers keep their pending state so the next
    /// tick can retry.
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// A single unparseable item; the caller skips it and proceeds with the
    /// rest of the batch.
    #[error("malformed item ({what}): {reason}")]
    MalformedInput { what: String, reason: String },

    /// A toggle callback referenced a summary the janitor already reclaimed.
    #[error("summary {0} is no longer available")]
    StaleReference(i64),

    /// Transport call failed after retries.
    #[error("transport failure: {0:#}")]
    Transport(anyhow::Error),
}

impl RelayError {
    pub fn malformed(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
