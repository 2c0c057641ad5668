use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;

use crate::docstore::{DocUpdate, DocumentStore};
use crate::lmsr::{self, LmsrHistory, LongShortHistory};
use crate::markets::{group_by_league, Hist, MarketId, Snapshot, Timeframe};
use crate::storage::RedisStore;

use super::{BATCH_LIMIT, BATCH_WORKERS};

/// Rebuilds the published per-market price history documents: a sampled
/// long-price series per timeframe, its period return, and the current
/// long price.
#[derive(Clone)]
pub struct MarketValueJob {
    store: RedisStore,
    docs: Arc<dyn DocumentStore>,
    data_dir: PathBuf,
}

/// Timeframes due for a document rebuild at minute `t`.
pub fn valuation_timeframes(t: i64) -> Vec<Timeframe> {
    let gates = [
        (Timeframe::Day, 60),
        (Timeframe::Week, 1_440),
        (Timeframe::Month, 10_080),
        (Timeframe::LongMonth, 40_320),
    ];
    gates.into_iter().filter(|(_, gate)| t % gate == 0).map(|(tf, _)| tf).collect()
}

/// Sampling stride targeting roughly thirty points per series.
pub fn sample_stride(len: usize) -> usize {
    (len / 30).max(1)
}

fn sampled<T: Clone>(series: &[T], stride: usize) -> Vec<T> {
    series.iter().step_by(stride).cloned().collect()
}

/// Long-price series for one timeframe: the sampled history rows plus the
/// current state appended last.
fn price_series(current: &Snapshot, hist: &Hist, tf: Timeframe) -> Option<Vec<f64>> {
    match (current, hist) {
        (Snapshot::Team { x, b }, Hist::Team { x: x_hist, b: b_hist }) => {
            let rows = x_hist.get(tf);
            let stride = sample_stride(rows.len());
            let mut xs = sampled(rows, stride);
            let mut bs = sampled(b_hist.get(tf), stride);
            if xs.len() != bs.len() {
                return None;
            }
            xs.push(x.clone());
            bs.push(*b);
            let q = lmsr::q_back(x.len(), lmsr::TEAM_BACK_DIVISOR);
            Some(LmsrHistory::new(xs, bs).spot_values(&q))
        }
        (Snapshot::Player { n, b }, Hist::Player { n: n_hist, b: b_hist }) => {
            let rows = n_hist.get(tf);
            let stride = sample_stride(rows.len());
            let mut ns = sampled(rows, stride);
            let mut bs = sampled(b_hist.get(tf), stride);
            if ns.len() != bs.len() {
                return None;
            }
            ns.push(*n);
            bs.push(*b);
            Some(LongShortHistory::new(&ns, &bs).spot_longs().to_vec())
        }
        _ => None,
    }
}

/// The batched field updates for one market document, or `None` when the
/// stored state is unusable.
pub fn build_market_update(
    current: &Snapshot,
    hist: &Hist,
    timeframes: &[Timeframe],
) -> Option<DocUpdate> {
    let mut update = DocUpdate::new();
    let mut latest = None;
    for tf in timeframes {
        let series = price_series(current, hist, *tf)?;
        let (first, last) = (*series.first()?, *series.last()?);
        update = update
            .set(format!("long_price_hist.{}", tf.tag()), &series)
            .set(format!("long_price_returns_{}", tf.tag()), last / first - 1.0);
        latest = Some(last);
    }
    Some(update.set("long_price_current", latest?))
}

impl MarketValueJob {
    pub fn new(store: RedisStore, docs: Arc<dyn DocumentStore>, data_dir: PathBuf) -> Self {
        Self { store, docs, data_dir }
    }

    pub async fn run(&self, t: i64) -> anyhow::Result<()> {
        let timeframes = valuation_timeframes(t);
        if timeframes.is_empty() {
            return Ok(());
        }

        let teams = super::read_market_file(&self.data_dir.join("teams.txt"))?;
        for group in group_by_league(teams) {
            if let Err(err) = self.update_collection(&group, &timeframes, "teams").await {
                tracing::error!(target: "jobs", %err, "team market document update failed");
            }
        }

        let players = super::read_market_file(&self.data_dir.join("players.txt"))?;
        for group in group_by_league(players) {
            if let Err(err) = self.update_collection(&group, &timeframes, "players").await {
                tracing::error!(target: "jobs", %err, "player market document update failed");
            }
        }

        let tags: Vec<&str> = timeframes.iter().map(|tf| tf.tag()).collect();
        tracing::info!(target: "jobs", t, timeframes = ?tags, "market documents updated");
        Ok(())
    }

    async fn update_collection(
        &self,
        markets: &[MarketId],
        timeframes: &[Timeframe],
        collection: &'static str,
    ) -> anyhow::Result<()> {
        let (currents, hists) = self.store.current_and_hist(markets).await?;

        let mut updates = Vec::new();
        for ((market, current), hist) in markets.iter().zip(currents).zip(hists) {
            let (Some(current), Some(hist)) = (current, hist) else {
                tracing::error!(target: "jobs", market = %market, "cannot value market: state missing");
                continue;
            };
            match build_market_update(&current, &hist, timeframes) {
                Some(update) => updates.push((market.to_string(), update)),
                None => {
                    tracing::error!(target: "jobs", market = %market, "cannot value market: malformed series")
                }
            }
        }

        let chunks: Vec<Vec<(String, DocUpdate)>> =
            updates.chunks(BATCH_LIMIT).map(|chunk| chunk.to_vec()).collect();
        futures::stream::iter(chunks)
            .map(|chunk| {
                let docs = self.docs.clone();
                async move { docs.commit_batch(collection, chunk).await }
            })
            .buffer_unordered(BATCH_WORKERS)
            .for_each(|result| async {
                if let Err(err) = result {
                    tracing::error!(target: "jobs", %err, collection, "batch commit failed");
                }
            })
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gates_follow_the_minute_counter() {
        assert!(valuation_timeframes(2).is_empty());
        assert_eq!(valuation_timeframes(60), vec![Timeframe::Day]);
        assert_eq!(valuation_timeframes(1_440), vec![Timeframe::Day, Timeframe::Week]);
        assert_eq!(valuation_timeframes(40_320).len(), 4);
    }

    #[test]
    fn stride_targets_thirty_points() {
        assert_eq!(sample_stride(0), 1);
        assert_eq!(sample_stride(29), 1);
        assert_eq!(sample_stride(60), 2);
        assert_eq!(sample_stride(120), 4);
    }

    #[test]
    fn update_carries_series_returns_and_current() {
        let current = Snapshot::Player { n: 50.0, b: 100.0 };
        let hist = Hist::seeded(&Snapshot::Player { n: 0.0, b: 100.0 });
        let update = build_market_update(&current, &hist, &[Timeframe::Day]).unwrap();

        let series = update.set.get("long_price_hist.d").unwrap().as_array().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].as_f64().unwrap(), 0.5);
        let last = series[1].as_f64().unwrap();
        assert!(last > 0.5);

        let ret = update.set.get("long_price_returns_d").unwrap().as_f64().unwrap();
        assert!((ret - (last / 0.5 - 1.0)).abs() < 1e-12);
        assert_eq!(update.set.get("long_price_current").unwrap().as_f64().unwrap(), last);
    }

    #[test]
    fn mismatched_state_is_rejected() {
        let current = Snapshot::Team { x: vec![0.0, 0.0], b: 10.0 };
        let hist = Hist::seeded(&Snapshot::Player { n: 0.0, b: 10.0 });
        assert!(build_market_update(&current, &hist, &[Timeframe::Day]).is_none());
    }
}
