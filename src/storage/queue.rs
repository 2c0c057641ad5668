use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::utils::time::unix_now;

use super::state::RedisStore;
use super::StoreResult;

/// Sorted set of scheduled undo job ids, scored by fire time.
const SCHEDULE_KEY: &str = "undo:schedule";
/// Job payloads outlive their fire time a little so a slow worker can still
/// read them.
const PAYLOAD_TTL_SECS: u64 = 300;

/// Delayed-work queue backing the compensating-undo schedule.
///
/// The trade engine publishes `{payload, fire_at}`; a worker polls for due
/// entries. Claiming is a single ZREM per job id, so between the worker and
/// a cancelling confirmation exactly one side wins.
#[derive(Clone)]
pub struct UndoQueue {
    conn: ConnectionManager,
}

impl UndoQueue {
    pub fn new(store: &RedisStore) -> Self {
        Self { conn: store.manager() }
    }

    fn payload_key(job_id: &str) -> String {
        format!("undo:job:{job_id}")
    }

    /// Enqueue a payload to fire after `delay`; returns the job id.
    pub async fn schedule<T: Serialize>(&self, payload: &T, delay: Duration) -> StoreResult<String> {
        let job_id = Uuid::new_v4().simple().to_string();
        let fire_at = unix_now() + delay.as_secs() as i64;
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.zadd(SCHEDULE_KEY, &job_id, fire_at).ignore();
        pipe.set_ex(Self::payload_key(&job_id), serde_json::to_string(payload)?, PAYLOAD_TTL_SECS)
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(job_id)
    }

    /// Remove a scheduled job. `false` means it already fired (or was
    /// cancelled before).
    pub async fn cancel(&self, job_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(SCHEDULE_KEY, job_id).await?;
        if removed > 0 {
            let _: () = conn.del(Self::payload_key(job_id)).await?;
        }
        Ok(removed > 0)
    }

    /// Claim up to `limit` due jobs. Each claim is won by the ZREM, so a
    /// concurrently cancelling confirmation cannot double-fire an undo.
    pub async fn claim_due<T: DeserializeOwned>(
        &self,
        now: i64,
        limit: isize,
    ) -> StoreResult<Vec<T>> {
        let mut conn = self.conn.clone();
        let due: Vec<String> =
            conn.zrangebyscore_limit(SCHEDULE_KEY, "-inf", now, 0, limit).await?;

        let mut claimed = Vec::new();
        for job_id in due {
            let removed: i64 = conn.zrem(SCHEDULE_KEY, &job_id).await?;
            if removed == 0 {
                continue;
            }
            let raw: Option<String> = redis::cmd("GETDEL")
                .arg(Self::payload_key(&job_id))
                .query_async(&mut conn)
                .await?;
            match raw {
                Some(raw) => claimed.push(serde_json::from_str(&raw)?),
                None => {
                    tracing::warn!(target: "trade", job_id = %job_id, "undo payload missing for due job")
                }
            }
        }
        Ok(claimed)
    }
}
