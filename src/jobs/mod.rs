use std::fs;
use std::path::Path;

use crate::markets::MarketId;

pub mod market_values;
pub mod portfolio_values;
pub mod scheduler;
pub mod snapshots;

pub use market_values::MarketValueJob;
pub use portfolio_values::PortfolioValueJob;
pub use snapshots::SnapshotJob;

/// Document-store write batch limit per commit.
pub(crate) const BATCH_LIMIT: usize = 499;
/// Bound on concurrent batch commits.
pub(crate) const BATCH_WORKERS: usize = 8;

/// Read a newline-delimited market universe file, skipping malformed ids.
pub(crate) fn read_market_file(path: &Path) -> anyhow::Result<Vec<MarketId>> {
    let raw = fs::read_to_string(path)?;
    let mut ids = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match MarketId::parse(line) {
            Ok(id) => ids.push(id),
            Err(err) => tracing::warn!(target: "jobs", %err, "skipping market universe line"),
        }
    }
    Ok(ids)
}
