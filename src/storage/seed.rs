use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::markets::{Hist, MarketId, Snapshot, TimeLog};
use crate::utils::time::unix_now;

use super::state::RedisStore;

/// Seed the key-value store from `teams.json` and `players.json` in the
/// data directory: one snapshot and one singleton history per market, a
/// singleton time log, and fresh counter keys. Writing both blobs together
/// is what establishes the snapshot-iff-history invariant.
pub async fn seed_store(store: &RedisStore, data_dir: &Path) -> anyhow::Result<usize> {
    let mut pairs = Vec::new();
    for file in ["teams.json", "players.json"] {
        let path = data_dir.join(file);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        let markets: HashMap<String, Snapshot> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse seed file {}", path.display()))?;

        for (raw_id, snapshot) in markets {
            match MarketId::parse(&raw_id) {
                Ok(id) => pairs.push((id, snapshot)),
                Err(err) => {
                    tracing::warn!(target: "jobs", %err, file, "skipping malformed seed market")
                }
            }
        }
    }

    let hists: Vec<(MarketId, Hist)> =
        pairs.iter().map(|(id, snap)| (id.clone(), Hist::seeded(snap))).collect();

    store.put_snapshots(&pairs).await?;
    store.put_hists(&hists).await?;
    store.put_time_log(&TimeLog::singleton(unix_now())).await?;
    store.reset_counters(672).await?;

    tracing::info!(target: "jobs", markets = pairs.len(), "seeded market state");
    Ok(pairs.len())
}
