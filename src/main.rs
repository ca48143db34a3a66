//! Relay binary entrypoint: wires the store, connectors, transport and
//! summarizer into the pipeline context, then spawns the periodic tasks and
//! the callback update loop.

use anyhow::Context as _;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use teams_alert_relay::config::{RelayConfig, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};
use teams_alert_relay::context::Ctx;
use teams_alert_relay::ingest::teams::{ClientCredentialsTokenProvider, TeamsConnector};
use teams_alert_relay::news::{DisabledNewsSource, JsonFeedSource, NewsSource};
use teams_alert_relay::notify::telegram::{run_update_loop, TelegramTransport};
use teams_alert_relay::scheduler;
use teams_alert_relay::store::Store;
use teams_alert_relay::summarize::build_summarizer;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("teams_alert_relay=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config_path = std::env::var(ENV_CONFIG_PATH)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = RelayConfig::load_or_default(&config_path);

    let db_path = std::env::var("RELAY_DB_PATH").unwrap_or_else(|_| "relay.db".to_string());
    let store = Arc::new(Store::open(&db_path)?);

    let transport = Arc::new(TelegramTransport::from_env()?);
    let destination =
        std::env::var("TELEGRAM_CHAT_ID").context("Missing TELEGRAM_CHAT_ID env var")?;

    let tokens = Arc::new(ClientCredentialsTokenProvider::from_env()?);
    let source = Arc::new(TeamsConnector::from_env(tokens)?);

    let news_source: Arc<dyn NewsSource> = match std::env::var("NEWS_FEED_URL") {
        Ok(url) if !url.trim().is_empty() => Arc::new(JsonFeedSource::new(url)),
        _ => {
            tracing::info!("news source disabled (no NEWS_FEED_URL)");
            Arc::new(DisabledNewsSource)
        }
    };

    let ctx = Arc::new(Ctx::new(
        cfg,
        store.clone(),
        transport.clone(),
        build_summarizer(),
        source,
        news_source,
        destination,
    )?);

    tracing::info!(db = %db_path, config = %config_path, "relay starting");
    let mut handles = scheduler::spawn_all(ctx);
    handles.push(tokio::spawn(run_update_loop(transport, store)));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
