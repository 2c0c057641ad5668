use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::sleep;

use crate::markets::{Hist, MarketId, Snapshot, TimeLog};
use crate::types::RedisConfig;

use super::{StoreError, StoreResult};

/// Key of the singleton time log.
const TIME_KEY: &str = "time";
/// Key of the persisted scheduler minute counter.
const COUNTER_KEY: &str = "t";
/// Key of the doubling long-month snapshot interval.
const MAX_INTERVAL_KEY: &str = "max_interval";

/// Pause between optimistic-lock retries.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Typed access to market snapshots, rolling histories and the time log.
///
/// Plain reads and pipelined bulk operations go through a multiplexed
/// connection manager; the optimistic-lock loop opens a dedicated
/// connection per round because WATCH state is per-connection.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(cfg: &RedisConfig) -> StoreResult<Self> {
        let client = redis::Client::open(cfg.url.as_str())?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }

    pub(crate) fn manager(&self) -> ConnectionManager {
        self.conn.clone()
    }

    pub async fn exists(&self, market: &MarketId) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(market.as_str()).await?)
    }

    pub async fn snapshot(&self, market: &MarketId) -> StoreResult<Option<Snapshot>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(market.as_str()).await?;
        decode_opt(raw)
    }

    /// Pipelined snapshot fetch; unknown markets come back as `None`.
    pub async fn snapshots(&self, markets: &[MarketId]) -> StoreResult<Vec<Option<Snapshot>>> {
        if markets.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for market in markets {
            pipe.get(market.as_str());
        }
        let raw: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        raw.into_iter().map(decode_opt).collect()
    }

    pub async fn hist(&self, market: &MarketId) -> StoreResult<Option<Hist>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(market.hist_key()).await?;
        decode_opt(raw)
    }

    pub async fn hists(&self, markets: &[MarketId]) -> StoreResult<Vec<Option<Hist>>> {
        if markets.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for market in markets {
            pipe.get(market.hist_key());
        }
        let raw: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        raw.into_iter().map(decode_opt).collect()
    }

    /// Snapshot and history for each market in one interleaved pipeline.
    pub async fn current_and_hist(
        &self,
        markets: &[MarketId],
    ) -> StoreResult<(Vec<Option<Snapshot>>, Vec<Option<Hist>>)> {
        if markets.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for market in markets {
            pipe.get(market.as_str());
            pipe.get(market.hist_key());
        }
        let raw: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        let mut currents = Vec::with_capacity(markets.len());
        let mut hists = Vec::with_capacity(markets.len());
        for pair in raw.chunks(2) {
            currents.push(decode_opt(pair[0].clone())?);
            hists.push(decode_opt(pair[1].clone())?);
        }
        Ok((currents, hists))
    }

    pub async fn put_snapshots(&self, snapshots: &[(MarketId, Snapshot)]) -> StoreResult<()> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (market, snapshot) in snapshots {
            pipe.set(market.as_str(), serde_json::to_string(snapshot)?).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    pub async fn put_hists(&self, hists: &[(MarketId, Hist)]) -> StoreResult<()> {
        if hists.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (market, hist) in hists {
            pipe.set(market.hist_key(), serde_json::to_string(hist)?).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    pub async fn time_log(&self) -> StoreResult<TimeLog> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(TIME_KEY).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(StoreError::NotFound(TIME_KEY.to_string())),
        }
    }

    pub async fn put_time_log(&self, time: &TimeLog) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(TIME_KEY, serde_json::to_string(time)?).await?;
        Ok(())
    }

    /// Optimistic read-modify-write on one market snapshot.
    ///
    /// Each round arms a WATCH on the key, reads the current snapshot,
    /// applies `f` and commits the proposal inside MULTI/EXEC. A nil EXEC
    /// means another writer got there first; back off and retry up to
    /// `attempts` times.
    pub async fn watch_update<F>(
        &self,
        market: &MarketId,
        attempts: u32,
        mut f: F,
    ) -> StoreResult<Snapshot>
    where
        F: FnMut(Snapshot) -> StoreResult<Snapshot>,
    {
        let key = market.as_str();
        for attempt in 1..=attempts {
            let mut conn = self.client.get_async_connection().await?;
            redis::cmd("WATCH").arg(key).query_async::<_, ()>(&mut conn).await?;

            let raw: Option<String> = conn.get(key).await?;
            let Some(raw) = raw else {
                redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
                return Err(StoreError::NotFound(key.to_string()));
            };
            let current: Snapshot = serde_json::from_str(&raw)?;
            let proposed = f(current)?;
            let payload = serde_json::to_string(&proposed)?;

            let exec: Option<redis::Value> = redis::pipe()
                .atomic()
                .set(key, payload)
                .ignore()
                .query_async(&mut conn)
                .await?;

            if exec.is_some() {
                return Ok(proposed);
            }

            tracing::warn!(target: "trade", market = key, attempt, "watch conflict, retrying");
            sleep(RETRY_BACKOFF).await;
        }
        Err(StoreError::Contention(attempts))
    }

    /// Store a pending-confirmation payload under its cancel id with a TTL.
    pub async fn set_pending<T: Serialize>(
        &self,
        cancel_id: &str,
        payload: &T,
        ttl_secs: u64,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(cancel_id, serde_json::to_string(payload)?, ttl_secs).await?;
        Ok(())
    }

    /// Atomically consume a pending-confirmation payload. A cancel id can be
    /// taken at most once; `None` means it expired or was already taken.
    pub async fn take_pending<T: DeserializeOwned>(
        &self,
        cancel_id: &str,
    ) -> StoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> =
            redis::cmd("GETDEL").arg(cancel_id).query_async(&mut conn).await?;
        decode_opt(raw)
    }

    /// Advance the persisted minute counter and return its new value.
    pub async fn counter_advance(&self, by: i64) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(COUNTER_KEY, by).await?)
    }

    pub async fn max_interval(&self) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(MAX_INTERVAL_KEY).await?;
        value.ok_or_else(|| StoreError::NotFound(MAX_INTERVAL_KEY.to_string()))
    }

    /// Double the long-month interval after a decimation pass.
    pub async fn double_max_interval(&self) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let current: i64 = conn
            .get::<_, Option<i64>>(MAX_INTERVAL_KEY)
            .await?
            .ok_or_else(|| StoreError::NotFound(MAX_INTERVAL_KEY.to_string()))?;
        Ok(conn.incr(MAX_INTERVAL_KEY, current).await?)
    }

    /// Ensure the counter keys exist without clobbering live values.
    pub async fn init_counters(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn.set_nx(COUNTER_KEY, 0i64).await?;
        let _: bool = conn.set_nx(MAX_INTERVAL_KEY, 672i64).await?;
        Ok(())
    }

    /// Overwrite the counter keys, used when reseeding the store.
    pub(crate) async fn reset_counters(&self, max_interval: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.set(COUNTER_KEY, 0i64).ignore();
        pipe.set(MAX_INTERVAL_KEY, max_interval).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

fn decode_opt<T: DeserializeOwned>(raw: Option<String>) -> StoreResult<Option<T>> {
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}
