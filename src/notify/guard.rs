// src/notify/guard.rs
// Idempotent dispatch by content fingerprint. Claiming the (destination,
// hash) row is the linearization point: it happens before the transport call,
// so a retried or concurrently scheduled tick can never double-send. The
// flip side is accepted deliberately: if the transport call fails after the
// claim, the content stays marked as sent.

use chrono::Utc;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::error::{RelayError, Result};
use crate::notify::{InlineButton, MessageRef, Transport};
use crate::store::Store;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("dispatch_sent_total", "Messages handed to the transport.");
        describe_counter!(
            "dispatch_skipped_total",
            "Dispatches suppressed by an existing content fingerprint."
        );
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Sent(MessageRef),
    Skipped,
}

pub struct SendGuard {
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
}

impl SendGuard {
    pub fn new(store: Arc<Store>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Send `text` to `destination` unless identical content already went
    /// there. Dispatch is a request, not a guaranteed send.
    pub async fn dispatch(
        &self,
        destination: &str,
        text: &str,
        controls: &[InlineButton],
    ) -> Result<Dispatch> {
        ensure_metrics_described();

        let hash = content_hash(text);
        if !self
            .store
            .try_insert_fingerprint(destination, &hash, Utc::now())?
        {
            counter!("dispatch_skipped_total").increment(1);
            tracing::debug!(destination, hash = %hash, "duplicate content, dispatch skipped");
            return Ok(Dispatch::Skipped);
        }

        let msg = self
            .transport
            .send(destination, text, controls)
            .await
            .map_err(RelayError::Transport)?;
        counter!("dispatch_sent_total").increment(1);
        Ok(Dispatch::Sent(msg))
    }
}

pub fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
