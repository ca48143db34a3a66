// src/context.rs
// Explicit pipeline context passed to every periodic task, replacing global
// mutable state with store-backed handles.

use std::sync::Arc;

use crate::aggregate::Aggregator;
use crate::classify::Classifier;
use crate::config::RelayConfig;
use crate::dedup::DedupGuard;
use crate::ingest::SourceConnector;
use crate::news::{NewsFilter, NewsSource};
use crate::notify::guard::SendGuard;
use crate::notify::Transport;
use crate::store::Store;
use crate::summarize::DynSummarizer;

pub struct Ctx {
    pub cfg: RelayConfig,
    pub store: Arc<Store>,
    pub classifier: Classifier,
    pub dedup: DedupGuard,
    pub aggregator: Aggregator,
    pub guard: SendGuard,
    pub summarizer: DynSummarizer,
    pub source: Arc<dyn SourceConnector>,
    pub news_source: Arc<dyn NewsSource>,
    pub news_filter: NewsFilter,
    /// Chat id of the single notification destination.
    pub destination: String,
}

impl Ctx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: RelayConfig,
        store: Arc<Store>,
        transport: Arc<dyn Transport>,
        summarizer: DynSummarizer,
        source: Arc<dyn SourceConnector>,
        news_source: Arc<dyn NewsSource>,
        destination: String,
    ) -> anyhow::Result<Self> {
        let offset = cfg.display_offset();
        let classifier = Classifier::from_config(&cfg.alert, &cfg.rule)?;
        let news_filter = NewsFilter::from_config(&cfg.news, offset)?;
        Ok(Self {
            classifier,
            dedup: DedupGuard::new(store.clone(), offset),
            aggregator: Aggregator::new(store.clone(), offset),
            guard: SendGuard::new(store.clone(), transport),
            summarizer,
            source,
            news_source,
            news_filter,
            destination,
            store,
            cfg,
        })
    }
}
