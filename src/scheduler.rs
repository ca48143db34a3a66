// src/scheduler.rs
// One independent ticker per periodic entry point: ingest, flush_hourly,
// reset_epoch, news_ingest, news_tick, purge. Every tick runs to completion
// and logs its outcome; no failure escapes a task, no task blocks another.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::context::Ctx;
use crate::{ingest, janitor, news};

pub fn spawn_all(ctx: Arc<Ctx>) -> Vec<JoinHandle<()>> {
    let s = &ctx.cfg.schedule;
    vec![
        spawn_ingest(ctx.clone(), s.ingest_secs),
        spawn_flush_hourly(ctx.clone(), s.flush_secs),
        spawn_reset_epoch(ctx.clone(), s.epoch_check_secs),
        spawn_news_ingest(ctx.clone(), s.news_ingest_secs),
        spawn_news_tick(ctx.clone(), s.news_tick_secs),
        spawn_purge(ctx.clone(), s.purge_secs),
    ]
}

pub fn spawn_ingest(ctx: Arc<Ctx>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match ingest::run_once(&ctx).await {
                Ok(report) if report.fetched > 0 => {
                    tracing::info!(
                        target: "ingest",
                        fetched = report.fetched,
                        immediate = report.immediate,
                        aggregated = report.aggregated,
                        digest = report.digest_sent,
                        "ingest tick"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(target: "ingest", error = ?e, "ingest tick failed"),
            }
        }
    })
}

pub fn spawn_flush_hourly(ctx: Arc<Ctx>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match ctx.aggregator.flush(&ctx.guard, &ctx.destination).await {
                Ok(Some(id)) => tracing::info!(target: "flush", summary_id = id, "flush tick"),
                Ok(None) => {}
                Err(e) => tracing::warn!(target: "flush", error = ?e, "flush tick failed"),
            }
        }
    })
}

pub fn spawn_reset_epoch(ctx: Arc<Ctx>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match ctx.dedup.reset_epoch_if_due(Utc::now()) {
                Ok(Some(cleared)) => {
                    tracing::info!(target: "epoch", cleared, "dedup epoch reset");
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(target: "epoch", error = ?e, "epoch reset failed"),
            }
        }
    })
}

pub fn spawn_news_ingest(ctx: Arc<Ctx>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match news::ingest_once(&ctx).await {
                Ok(report) if report.listed > 0 => {
                    tracing::info!(
                        target: "news",
                        listed = report.listed,
                        inserted = report.inserted,
                        discarded = report.discarded,
                        malformed = report.malformed,
                        "news ingest tick"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(target: "news", error = ?e, "news ingest failed"),
            }
        }
    })
}

pub fn spawn_news_tick(ctx: Arc<Ctx>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match news::tick_once(&ctx).await {
                Ok(report) if report.due > 0 => {
                    tracing::info!(
                        target: "news",
                        due = report.due,
                        posted = report.posted,
                        skipped = report.skipped,
                        "news tick"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(target: "news", error = ?e, "news tick failed"),
            }
        }
    })
}

pub fn spawn_purge(ctx: Arc<Ctx>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match janitor::purge_once(&ctx.store, &ctx.cfg.retention) {
                Ok(report) if report.summaries > 0 || report.news > 0 => {
                    tracing::info!(
                        target: "purge",
                        summaries = report.summaries,
                        news = report.news,
                        "retention purge"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(target: "purge", error = ?e, "retention purge failed"),
            }
        }
    })
}
