use std::path::PathBuf;
use std::time::Instant;

use anyhow::bail;

use crate::markets::{group_by_league, Hist, MarketId, Snapshot, Timeframe};
use crate::storage::RedisStore;
use crate::utils::time::unix_now;

/// Rolling-history bounds: short timeframes keep a fixed window, the
/// long-month series decimates and doubles its sampling interval instead.
const SHORT_RETENTION: usize = 60;
const LONG_RETENTION: usize = 120;

/// Copies current market state into the rolling historical series on every
/// scheduler tick, then appends to the time log. The time log is written
/// last; readers truncate `b` to the time log's length to hide the skew
/// window.
#[derive(Clone)]
pub struct SnapshotJob {
    store: RedisStore,
    data_dir: PathBuf,
}

/// Which timeframes are due at minute `t`. The intervals are in scheduler
/// minutes: each series spans its window in roughly sixty samples.
pub fn timeframes_for(t: i64, max_interval: i64) -> Vec<Timeframe> {
    let intervals = [
        (Timeframe::Hour, 2),
        (Timeframe::Day, 24),
        (Timeframe::Week, 168),
        (Timeframe::Month, 672),
        (Timeframe::LongMonth, max_interval),
    ];
    intervals
        .into_iter()
        .filter(|(_, interval)| *interval > 0 && t % interval == 0)
        .map(|(tf, _)| tf)
        .collect()
}

/// Apply the retention rule after an append. Returns whether a long-month
/// decimation happened, which obliges the caller to double `max_interval`.
pub fn apply_retention<T>(series: &mut Vec<T>, tf: Timeframe) -> bool {
    match tf {
        Timeframe::LongMonth => {
            if series.len() > LONG_RETENTION {
                // Keep even indices: every second sample starting at the
                // second one is dropped.
                let mut i = 0;
                series.retain(|_| {
                    let keep = i % 2 == 0;
                    i += 1;
                    keep
                });
                true
            } else {
                false
            }
        }
        _ => {
            if series.len() > SHORT_RETENTION {
                series.remove(0);
            }
            false
        }
    }
}

/// Append the current snapshot onto one timeframe of a history, applying
/// retention to both axes so their lengths stay equal.
pub fn append_snapshot(hist: &mut Hist, current: &Snapshot, tf: Timeframe) -> anyhow::Result<()> {
    match (hist, current) {
        (Hist::Team { x, b }, Snapshot::Team { x: cur_x, b: cur_b }) => {
            x.get_mut(tf).push(cur_x.clone());
            apply_retention(x.get_mut(tf), tf);
            b.get_mut(tf).push(*cur_b);
            apply_retention(b.get_mut(tf), tf);
        }
        (Hist::Player { n, b }, Snapshot::Player { n: cur_n, b: cur_b }) => {
            n.get_mut(tf).push(*cur_n);
            apply_retention(n.get_mut(tf), tf);
            b.get_mut(tf).push(*cur_b);
            apply_retention(b.get_mut(tf), tf);
        }
        _ => bail!("snapshot and history shapes differ"),
    }
    Ok(())
}

impl SnapshotJob {
    pub fn new(store: RedisStore, data_dir: PathBuf) -> Self {
        Self { store, data_dir }
    }

    pub async fn run(&self, t: i64) -> anyhow::Result<()> {
        let max_interval = self.store.max_interval().await?;
        let timeframes = timeframes_for(t, max_interval);
        if timeframes.is_empty() {
            return Ok(());
        }
        let started = Instant::now();

        let teams = super::read_market_file(&self.data_dir.join("teams.txt"))?;
        self.update_markets(&teams, &timeframes).await?;

        // Players are chunked by league to keep a bounded number of blobs
        // in flight at a time.
        let players = super::read_market_file(&self.data_dir.join("players.txt"))?;
        for group in group_by_league(players) {
            self.update_markets(&group, &timeframes).await?;
        }

        self.update_time(&timeframes).await?;

        let tags: Vec<&str> = timeframes.iter().map(|tf| tf.tag()).collect();
        tracing::info!(
            target: "jobs",
            t,
            timeframes = ?tags,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "historical holdings updated"
        );
        Ok(())
    }

    async fn update_markets(
        &self,
        markets: &[MarketId],
        timeframes: &[Timeframe],
    ) -> anyhow::Result<()> {
        let (currents, hists) = self.store.current_and_hist(markets).await?;

        let mut updated = Vec::with_capacity(markets.len());
        for ((market, current), hist) in markets.iter().zip(currents).zip(hists) {
            let (Some(current), Some(mut hist)) = (current, hist) else {
                tracing::error!(
                    target: "jobs",
                    market = %market,
                    "cannot update history: state missing from store"
                );
                continue;
            };
            let mut complete = true;
            for tf in timeframes {
                if let Err(err) = append_snapshot(&mut hist, &current, *tf) {
                    tracing::error!(target: "jobs", market = %market, %err, "history append failed");
                    complete = false;
                    break;
                }
            }
            if complete {
                updated.push((market.clone(), hist));
            }
        }

        self.store.put_hists(&updated).await?;
        Ok(())
    }

    /// Append `now` to each updated timeframe of the time log, mirroring
    /// the per-market retention. A long-month decimation here doubles the
    /// persisted `max_interval`.
    async fn update_time(&self, timeframes: &[Timeframe]) -> anyhow::Result<()> {
        let mut log = self.store.time_log().await?;
        let now = unix_now();
        for tf in timeframes {
            let series = log.get_mut(*tf);
            series.push(now);
            if apply_retention(series, *tf) {
                let doubled = self.store.double_max_interval().await?;
                tracing::info!(target: "jobs", max_interval = doubled, "long-month interval doubled");
            }
        }
        self.store.put_time_log(&log).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hour_fires_every_tick_and_day_every_twelfth() {
        assert_eq!(timeframes_for(2, 672), vec![Timeframe::Hour]);
        assert!(timeframes_for(24, 672).contains(&Timeframe::Day));
        assert!(!timeframes_for(26, 672).contains(&Timeframe::Day));
        let all = timeframes_for(0, 672);
        assert_eq!(all.len(), 5);
        // A doubled interval moves the long-month cadence.
        assert!(timeframes_for(672, 1344).contains(&Timeframe::Month));
        assert!(!timeframes_for(672, 1344).contains(&Timeframe::LongMonth));
        assert!(timeframes_for(1344, 1344).contains(&Timeframe::LongMonth));
    }

    #[test]
    fn short_series_cap_at_sixty() {
        let mut series: Vec<i64> = (0..61).collect();
        assert!(!apply_retention(&mut series, Timeframe::Hour));
        assert_eq!(series.len(), 60);
        assert_eq!(series[0], 1);

        let mut at_cap: Vec<i64> = (0..60).collect();
        apply_retention(&mut at_cap, Timeframe::Hour);
        assert_eq!(at_cap.len(), 60);
        assert_eq!(at_cap[0], 0);
    }

    #[test]
    fn long_month_decimates_from_121_to_61() {
        let mut series: Vec<i64> = (0..121).collect();
        assert!(apply_retention(&mut series, Timeframe::LongMonth));
        assert_eq!(series.len(), 61);
        // Even indices survive.
        assert_eq!(series[0], 0);
        assert_eq!(series[1], 2);
        assert_eq!(series[60], 120);

        let mut below: Vec<i64> = (0..120).collect();
        assert!(!apply_retention(&mut below, Timeframe::LongMonth));
        assert_eq!(below.len(), 120);
    }

    #[test]
    fn append_keeps_axis_lengths_equal() {
        let snap = Snapshot::Team { x: vec![1.0, 2.0], b: 50.0 };
        let mut hist = Hist::seeded(&snap);
        for tf in Timeframe::ALL {
            append_snapshot(&mut hist, &snap, tf).unwrap();
        }
        let Hist::Team { x, b } = &hist else { panic!() };
        for tf in Timeframe::ALL {
            assert_eq!(x.get(tf).len(), b.get(tf).len());
            assert_eq!(x.get(tf).len(), 2);
        }
    }

    #[test]
    fn append_rejects_mismatched_shapes() {
        let team = Snapshot::Team { x: vec![1.0], b: 50.0 };
        let mut player_hist = Hist::seeded(&Snapshot::Player { n: 0.0, b: 50.0 });
        assert!(append_snapshot(&mut player_hist, &team, Timeframe::Hour).is_err());
    }
}
