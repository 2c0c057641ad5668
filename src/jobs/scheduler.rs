use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::MissedTickBehavior;

use crate::bot::TradingBot;
use crate::docstore;
use crate::storage::RedisStore;
use crate::types::AppConfig;

use super::{MarketValueJob, PortfolioValueJob, SnapshotJob};

/// One scheduler tick every two minutes; the persisted counter advances by
/// the same amount so cadences survive restarts.
const TICK_SECS: u64 = 120;
const TICK_MINUTES: i64 = 2;

/// Jitter bounds for the jobs that tolerate drift.
const VALUATION_JITTER_SECS: u64 = 120;
const BOT_JITTER_SECS: u64 = 20;

/// Single-process periodic driver for the snapshotter, the valuation jobs
/// and the trading bot. Every job is fenced: a failure is logged and the
/// tick counter still advances.
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let store = RedisStore::connect(&cfg.redis).await?;
    store.init_counters().await?;

    let docs = docstore::from_config(&cfg.docstore)?;
    let snapshots = SnapshotJob::new(store.clone(), cfg.data.dir.clone());
    let market_values = MarketValueJob::new(store.clone(), docs.clone(), cfg.data.dir.clone());
    let portfolio_values = PortfolioValueJob::new(store.clone(), docs);
    let bot = TradingBot::new(store.clone(), cfg.data.dir.clone(), cfg.logs.dir.clone(), &cfg.bot);

    let mut ticker = tokio::time::interval(Duration::from_secs(TICK_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(target: "jobs", "scheduler started");

    loop {
        ticker.tick().await;

        let t = match store.counter_advance(TICK_MINUTES).await {
            Ok(t) => t,
            Err(err) => {
                tracing::error!(target: "jobs", %err, "failed to advance tick counter");
                continue;
            }
        };

        // The snapshotter runs first and inline: everything downstream
        // reads what it writes.
        if let Err(err) = snapshots.run(t).await {
            tracing::error!(target: "jobs", t, %err, "snapshotter failed");
        }

        let job = market_values.clone();
        spawn_with_jitter("market-values", VALUATION_JITTER_SECS, async move { job.run(t).await });

        let job = portfolio_values.clone();
        spawn_with_jitter("portfolio-values", VALUATION_JITTER_SECS, async move {
            job.run(t).await
        });

        let job = bot.clone();
        spawn_with_jitter("trading-bot", BOT_JITTER_SECS, async move { job.run(t).await });
    }
}

fn spawn_with_jitter<F>(name: &'static str, jitter_secs: u64, job: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let delay = Duration::from_secs(rand::rng().random_range(0..=jitter_secs));
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = job.await {
            tracing::error!(target: "jobs", job = name, %err, "job failed");
        }
    });
}
