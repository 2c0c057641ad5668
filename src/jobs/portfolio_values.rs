use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::docstore::{DocUpdate, DocumentStore};
use crate::lmsr::{Lmsr, LmsrHistory, LongShort, LongShortHistory};
use crate::markets::{Hist, MarketId, Quantity, Snapshot, Timeframe};
use crate::storage::RedisStore;
use crate::trading::ledger::INITIAL_CASH;

use super::{BATCH_LIMIT, BATCH_WORKERS};

/// The reference rows used for historical portfolio values: the oldest
/// sample of each of these timeframes.
const REFERENCE_TIMEFRAMES: [Timeframe; 4] =
    [Timeframe::Day, Timeframe::Week, Timeframe::Month, Timeframe::LongMonth];

/// Recomputes every portfolio's current value and period returns from its
/// transaction history. Market state is fetched once per run and cached.
#[derive(Clone)]
pub struct PortfolioValueJob {
    store: RedisStore,
    docs: Arc<dyn DocumentStore>,
}

/// Pricing handles for one market: the current-state maker plus one
/// historical row per reference timeframe.
enum MarketHandle {
    Team { maker: Lmsr, hist: LmsrHistory },
    Player { maker: LongShort, hist: LongShortHistory },
}

impl MarketHandle {
    fn from_state(current: &Snapshot, hist: &Hist) -> Option<MarketHandle> {
        match (current, hist) {
            (Snapshot::Team { x, b }, Hist::Team { x: x_hist, b: b_hist }) => {
                let xs: Option<Vec<Vec<f64>>> = REFERENCE_TIMEFRAMES
                    .iter()
                    .map(|tf| x_hist.get(*tf).first().cloned())
                    .collect();
                let bs: Option<Vec<f64>> = REFERENCE_TIMEFRAMES
                    .iter()
                    .map(|tf| b_hist.get(*tf).first().copied())
                    .collect();
                Some(MarketHandle::Team {
                    maker: Lmsr::new(x.clone(), *b),
                    hist: LmsrHistory::new(xs?, bs?),
                })
            }
            (Snapshot::Player { n, b }, Hist::Player { n: n_hist, b: b_hist }) => {
                let ns: Option<Vec<f64>> = REFERENCE_TIMEFRAMES
                    .iter()
                    .map(|tf| n_hist.get(*tf).first().copied())
                    .collect();
                let bs: Option<Vec<f64>> = REFERENCE_TIMEFRAMES
                    .iter()
                    .map(|tf| b_hist.get(*tf).first().copied())
                    .collect();
                Some(MarketHandle::Player {
                    maker: LongShort::new(*n, *b),
                    hist: LongShortHistory::new(&ns?, &bs?),
                })
            }
            _ => None,
        }
    }

    /// Present value of a held quantity. Signed player quantities price
    /// longs above zero and shorts below.
    fn current_value(&self, quantity: &Quantity) -> Option<f64> {
        match (self, quantity) {
            (MarketHandle::Team { maker, .. }, Quantity::Vector(q))
                if q.len() == maker.outcomes() =>
            {
                Some(maker.spot_value(q))
            }
            (MarketHandle::Player { maker, .. }, Quantity::Scalar(q)) => {
                Some(if *q >= 0.0 { q * maker.spot_long() } else { -q * maker.spot_short() })
            }
            _ => None,
        }
    }

    /// Value of the quantity at each reference row.
    fn hist_values(&self, quantity: &Quantity) -> Option<Vec<f64>> {
        match (self, quantity) {
            (MarketHandle::Team { maker, hist }, Quantity::Vector(q))
                if q.len() == maker.outcomes() =>
            {
                Some(hist.spot_values(q))
            }
            (MarketHandle::Player { hist, .. }, Quantity::Scalar(q)) => {
                let values = if *q >= 0.0 {
                    hist.spot_longs().iter().map(|lp| q * lp).collect()
                } else {
                    hist.spot_longs().iter().map(|lp| -q * (1.0 - lp)).collect()
                };
                Some(values)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransactionRow {
    market: String,
    quantity: Quantity,
    price: f64,
    time: f64,
}

impl PortfolioValueJob {
    pub fn new(store: RedisStore, docs: Arc<dyn DocumentStore>) -> Self {
        Self { store, docs }
    }

    pub async fn run(&self, t: i64) -> anyhow::Result<()> {
        if t % 60 != 0 {
            return Ok(());
        }
        let started = Instant::now();

        let time_log = self.store.time_log().await?;
        let mut reference_times = [0i64; 4];
        for (slot, tf) in reference_times.iter_mut().zip(REFERENCE_TIMEFRAMES) {
            *slot = *time_log
                .get(tf)
                .first()
                .ok_or_else(|| anyhow::anyhow!("time log is empty for {}", tf.tag()))?;
        }

        // Per-run cache; `None` marks a market known to be unusable so it
        // is only reported once.
        let mut cache: HashMap<String, Option<MarketHandle>> = HashMap::new();

        let portfolios = self.docs.stream_all("portfolios").await?;
        let mut updates = Vec::new();
        for (portfolio_id, doc) in portfolios {
            let rows = parse_transactions(&doc);
            self.ensure_cached(&mut cache, &rows).await?;
            match portfolio_update(&rows, &cache, reference_times) {
                Some(update) => updates.push((portfolio_id, update)),
                None => tracing::warn!(
                    target: "jobs",
                    portfolio = %portfolio_id,
                    "portfolio valuation skipped"
                ),
            }
        }

        let count = updates.len();
        let chunks: Vec<Vec<(String, DocUpdate)>> =
            updates.chunks(BATCH_LIMIT).map(|chunk| chunk.to_vec()).collect();
        futures::stream::iter(chunks)
            .map(|chunk| {
                let docs = self.docs.clone();
                async move { docs.commit_batch("portfolios", chunk).await }
            })
            .buffer_unordered(BATCH_WORKERS)
            .for_each(|result| async {
                if let Err(err) = result {
                    tracing::error!(target: "jobs", %err, "portfolio batch commit failed");
                }
            })
            .await;

        tracing::info!(
            target: "jobs",
            t,
            portfolios = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "portfolio values updated"
        );
        Ok(())
    }

    async fn ensure_cached(
        &self,
        cache: &mut HashMap<String, Option<MarketHandle>>,
        rows: &[TransactionRow],
    ) -> anyhow::Result<()> {
        let mut missing: Vec<MarketId> = Vec::new();
        for row in rows {
            if cache.contains_key(&row.market) {
                continue;
            }
            match MarketId::parse(&row.market) {
                Ok(id) => {
                    if !missing.contains(&id) {
                        missing.push(id);
                    }
                }
                Err(err) => {
                    tracing::error!(target: "jobs", %err, "transaction references bad market");
                    cache.insert(row.market.clone(), None);
                }
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        let (currents, hists) = self.store.current_and_hist(&missing).await?;
        for ((market, current), hist) in missing.iter().zip(currents).zip(hists) {
            let handle = match (current, hist) {
                (Some(current), Some(hist)) => MarketHandle::from_state(&current, &hist),
                _ => None,
            };
            if handle.is_none() {
                tracing::error!(target: "jobs", market = %market, "market state missing for valuation");
            }
            cache.insert(market.to_string(), handle);
        }
        Ok(())
    }
}

fn parse_transactions(doc: &Value) -> Vec<TransactionRow> {
    let Some(entries) = doc.get("transactions").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect()
}

/// Sum each transaction's marked-to-market profit into the current value
/// and the four reference-time values, zeroing contributions that postdate
/// a reference row.
fn portfolio_update(
    rows: &[TransactionRow],
    cache: &HashMap<String, Option<MarketHandle>>,
    reference_times: [i64; 4],
) -> Option<DocUpdate> {
    let mut current = INITIAL_CASH;
    let mut historical = [INITIAL_CASH; 4];

    for row in rows {
        let Some(Some(handle)) = cache.get(&row.market) else {
            continue;
        };
        let value = handle.current_value(&row.quantity)?;
        current += value - row.price;

        let hist_values = handle.hist_values(&row.quantity)?;
        for (i, hist_value) in hist_values.iter().enumerate() {
            if row.time as i64 <= reference_times[i] {
                historical[i] += hist_value - row.price;
            }
        }
    }

    let mut update = DocUpdate::new().set("current_value", current);
    for (i, tf) in REFERENCE_TIMEFRAMES.iter().enumerate() {
        update = update.set(format!("returns_{}", tf.tag()), current / historical[i] - 1.0);
    }
    Some(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with(
        market: &str,
        current: Snapshot,
        hist: Hist,
    ) -> HashMap<String, Option<MarketHandle>> {
        let mut cache = HashMap::new();
        cache.insert(market.to_string(), MarketHandle::from_state(&current, &hist));
        cache
    }

    #[test]
    fn empty_portfolio_is_worth_starting_cash() {
        let cache = HashMap::new();
        let update = portfolio_update(&[], &cache, [0; 4]).unwrap();
        assert_eq!(update.set.get("current_value").unwrap().as_f64().unwrap(), INITIAL_CASH);
        for tf in ["d", "w", "m", "M"] {
            assert_eq!(
                update.set.get(&format!("returns_{tf}")).unwrap().as_f64().unwrap(),
                0.0
            );
        }
    }

    #[test]
    fn recent_transactions_do_not_move_old_reference_values() {
        let current = Snapshot::Player { n: 0.0, b: 100.0 };
        let cache = cache_with("9:8:1P", current.clone(), Hist::seeded(&current));
        let rows = vec![TransactionRow {
            market: "9:8:1P".to_string(),
            quantity: Quantity::Scalar(10.0),
            price: 5.0,
            // Newer than every reference row.
            time: 2_000.0,
        }];
        let update = portfolio_update(&rows, &cache, [1_000; 4]).unwrap();

        // Current value reflects the position: 10 longs at 0.5 minus the
        // 5.0 paid nets zero profit.
        let current_value = update.set.get("current_value").unwrap().as_f64().unwrap();
        assert!((current_value - INITIAL_CASH).abs() < 1e-9);
        // Historical rows predate the transaction, so returns stay flat.
        assert_eq!(update.set.get("returns_d").unwrap().as_f64().unwrap(), 0.0);
    }

    #[test]
    fn short_positions_value_through_the_short_price() {
        let current = Snapshot::Player { n: -40.0, b: 100.0 };
        let hist = Hist::seeded(&current);
        let handle = MarketHandle::from_state(&current, &hist).unwrap();
        let maker = LongShort::new(-40.0, 100.0);
        let value = handle.current_value(&Quantity::Scalar(-6.0)).unwrap();
        assert!((value - 6.0 * maker.spot_short()).abs() < 1e-12);
        let longs = handle.current_value(&Quantity::Scalar(6.0)).unwrap();
        assert!((longs - 6.0 * maker.spot_long()).abs() < 1e-12);
    }

    #[test]
    fn parses_transactions_leniently() {
        let doc = json!({
            "transactions": [
                {"market": "1:8:1T", "quantity": [1.0, 0.0], "price": 0.5, "time": 100.0},
                {"bad": true},
            ]
        });
        let rows = parse_transactions(&doc);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].market, "1:8:1T");
    }
}
