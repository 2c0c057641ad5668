use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use rand::seq::IndexedRandom;
use rand::Rng;
use rand_distr::Normal;
use serde::Serialize;

use crate::lmsr::{Lmsr, LongShort};
use crate::markets::{MarketId, Quantity, Snapshot};
use crate::storage::RedisStore;
use crate::types::BotConfig;
use crate::utils::time::{trade_log_folder, unix_now};

pub mod solver;

use solver::brentq;

/// Minimum cost for a team trade to be worth committing.
const MIN_TEAM_TRADE_COST: f64 = 10.0;
/// Player markets already within this of the belief are left alone.
const PLAYER_SKIP_TOLERANCE: f64 = 5e-4;

/// Periodically nudges random markets towards target belief distributions,
/// simulating background liquidity.
#[derive(Clone)]
pub struct TradingBot {
    store: RedisStore,
    data_dir: PathBuf,
    logs_dir: PathBuf,
    budget_factor: f64,
    trade_noise: bool,
    noise_level: f64,
}

/// One executed bot trade, as written to the trade log.
#[derive(Debug, Clone, Serialize)]
pub struct BotTrade {
    pub market: String,
    pub team: bool,
    pub quantity: Quantity,
    pub cost: f64,
    pub long: Option<bool>,
}

impl TradingBot {
    pub fn new(store: RedisStore, data_dir: PathBuf, logs_dir: PathBuf, cfg: &BotConfig) -> Self {
        Self {
            store,
            data_dir,
            logs_dir,
            budget_factor: cfg.budget_factor,
            trade_noise: cfg.trade_noise,
            noise_level: cfg.noise_level,
        }
    }

    /// Trade on minute 2 of every 10.
    pub async fn run(&self, t: i64) -> anyhow::Result<()> {
        if t % 10 != 2 {
            return Ok(());
        }

        let team_trades = self.trade_teams().await?;
        let player_trades = self.trade_players().await?;

        let all: Vec<&BotTrade> = team_trades.iter().chain(player_trades.iter()).collect();
        self.write_trade_log(&all)?;

        tracing::info!(
            target: "bot",
            t,
            team_trades = team_trades.len(),
            player_trades = player_trades.len(),
            "trading bot tick complete"
        );
        Ok(())
    }

    async fn trade_teams(&self) -> anyhow::Result<Vec<BotTrade>> {
        let raw = fs::read_to_string(self.data_dir.join("team_ms.json"))?;
        let beliefs: HashMap<String, Vec<f64>> = serde_json::from_str(&raw)?;
        let selected = self.select_teams(&beliefs);

        let ids: Vec<MarketId> = selected.iter().map(|(id, _)| id.clone()).collect();
        let snapshots = self.store.snapshots(&ids).await?;

        let mut trades = Vec::new();
        let mut writes = Vec::new();
        for ((id, m), snapshot) in selected.into_iter().zip(snapshots) {
            let Some(Snapshot::Team { x, b }) = snapshot else {
                tracing::error!(target: "bot", market = %id, "team snapshot missing");
                continue;
            };
            match optimal_trade_team(&m, &x, b, self.budget_factor) {
                Ok(Some((q, cost))) => {
                    let shifted: Vec<f64> = x.iter().zip(&q).map(|(xi, qi)| xi + qi).collect();
                    writes.push((id.clone(), Snapshot::Team { x: shifted, b }));
                    trades.push(BotTrade {
                        market: id.to_string(),
                        team: true,
                        quantity: Quantity::Vector(q),
                        cost,
                        long: None,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(target: "bot", market = %id, %err, "team trade failed")
                }
            }
        }

        self.store.put_snapshots(&writes).await?;
        Ok(trades)
    }

    async fn trade_players(&self) -> anyhow::Result<Vec<BotTrade>> {
        let raw = fs::read_to_string(self.data_dir.join("player_ms.json"))?;
        let beliefs: HashMap<String, f64> = serde_json::from_str(&raw)?;
        let selected = self.select_players(&beliefs);

        let ids: Vec<MarketId> = selected.iter().map(|(id, _)| id.clone()).collect();
        let snapshots = self.store.snapshots(&ids).await?;

        let mut trades = Vec::new();
        let mut writes = Vec::new();
        for ((id, m), snapshot) in selected.into_iter().zip(snapshots) {
            let Some(Snapshot::Player { n, b }) = snapshot else {
                tracing::error!(target: "bot", market = %id, "player snapshot missing");
                continue;
            };
            match optimal_trade_player(m, n, b, self.budget_factor) {
                Ok(Some((quantity, long, cost))) => {
                    let sign = if long { 1.0 } else { -1.0 };
                    writes.push((id.clone(), Snapshot::Player { n: n + quantity * sign, b }));
                    trades.push(BotTrade {
                        market: id.to_string(),
                        team: false,
                        quantity: Quantity::Scalar(quantity),
                        cost,
                        long: Some(long),
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(target: "bot", market = %id, n, b, m, %err, "player trade failed")
                }
            }
        }

        self.store.put_snapshots(&writes).await?;
        Ok(trades)
    }

    /// Pick roughly a sixth of the team universe, optionally perturbing
    /// each belief vector with a random exponential ramp.
    fn select_teams(&self, beliefs: &HashMap<String, Vec<f64>>) -> Vec<(MarketId, Vec<f64>)> {
        let mut rng = rand::rng();
        let keys: Vec<&String> = beliefs.keys().collect();
        let n_select = keys.len() / 6;
        keys.choose_multiple(&mut rng, n_select)
            .filter_map(|key| {
                let id = MarketId::parse(key).ok()?;
                let m = if self.trade_noise {
                    transform_beliefs(&beliefs[*key], &mut rng)
                } else {
                    beliefs[*key].clone()
                };
                Some((id, m))
            })
            .collect()
    }

    /// Pick roughly a sixth of the player universe, adding clipped
    /// Gaussian noise to each belief.
    fn select_players(&self, beliefs: &HashMap<String, f64>) -> Vec<(MarketId, f64)> {
        let mut rng = rand::rng();
        let noise = Normal::new(0.0, self.noise_level).ok();
        let keys: Vec<&String> = beliefs.keys().collect();
        let n_select = keys.len() / 6;
        keys.choose_multiple(&mut rng, n_select)
            .filter_map(|key| {
                let id = MarketId::parse(key).ok()?;
                let mut m = beliefs[*key];
                if self.trade_noise {
                    if let Some(noise) = noise {
                        m = (m + rng.sample(noise)).clamp(0.005, 0.995);
                    }
                }
                Some((id, m))
            })
            .collect()
    }

    fn write_trade_log(&self, trades: &[&BotTrade]) -> anyhow::Result<()> {
        let folder = self.logs_dir.join("trades").join(trade_log_folder());
        fs::create_dir_all(&folder)?;
        let path = folder.join(format!("{}.json", unix_now()));
        fs::write(&path, serde_json::to_string(trades)?)?;
        Ok(())
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn normalize(mut m: Vec<f64>) -> Vec<f64> {
    let total: f64 = m.iter().sum();
    if total > 0.0 {
        for value in &mut m {
            *value /= total;
        }
    }
    m
}

/// Tilt a probability mass vector with an exponential ramp over the index,
/// direction chosen uniformly and steepness drawn from U(1, 3), then
/// renormalize.
pub fn transform_beliefs(m: &[f64], rng: &mut impl Rng) -> Vec<f64> {
    let n = m.len();
    if n < 2 {
        return normalize(m.to_vec());
    }
    let xs: Vec<f64> = (0..n).map(|i| (n + 1 - i) as f64).collect();
    let first = xs[0];
    let last = xs[n - 1];
    let steepness = rng.random_range(1.0..3.0);
    let descending = rng.random_range(0.0..1.0) < 0.5;

    let out: Vec<f64> = m
        .iter()
        .enumerate()
        .map(|(i, mi)| {
            let ramp = if descending {
                (last - xs[i]) / (last - first) - 1.0
            } else {
                (xs[i] - first) / (last - first) - 1.0
            };
            mi * (steepness * ramp).exp()
        })
        .collect();
    normalize(out)
}

/// The bounded-budget team trade moving inventory towards the belief
/// vector `m`.
///
/// The unconstrained optimum is `q = b*ln(m) - x`, which can prescribe
/// selling. Dimensions are therefore zeroed from the smallest up, each
/// time re-solving a scalar offset so the trade exactly spends the
/// budget; the first candidate that is non-negative everywhere and costs
/// at least the significance floor wins.
pub fn optimal_trade_team(
    m: &[f64],
    x: &[f64],
    b: f64,
    budget_factor: f64,
) -> anyhow::Result<Option<(Vec<f64>, f64)>> {
    anyhow::ensure!(m.len() == x.len(), "belief and inventory lengths differ");
    anyhow::ensure!(m.iter().all(|p| *p > 0.0), "belief vector must be strictly positive");
    anyhow::ensure!(b > 0.0, "liquidity parameter must be positive");

    let n = x.len();
    let budget = budget_factor * b;
    let maker = Lmsr::new(x.to_vec(), b);
    let base_cost = maker.cost(x);

    let q_opt: Vec<f64> = m.iter().zip(x).map(|(mi, xi)| b * mi.ln() - xi).collect();
    let mut sorted_dims: Vec<usize> = (0..n).collect();
    sorted_dims.sort_by(|&i, &j| q_opt[i].total_cmp(&q_opt[j]));
    let k_min = -q_opt.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let candidate = |k: f64, zeroed: &[usize]| {
        let mut q: Vec<f64> = q_opt.iter().map(|qi| qi + k).collect();
        for &dim in zeroed {
            q[dim] = 0.0;
        }
        q
    };

    for j in 0..n {
        let zeroed = &sorted_dims[..j];
        let k_max = budget - q_opt[j] + base_cost - x[j];
        let k = brentq(|k| maker.price_trade(&candidate(k, zeroed)) - budget, k_min, k_max)?;

        let q: Vec<f64> = candidate(k, zeroed).iter().map(|v| round2(*v)).collect();
        let cost = maker.price_trade(&q);

        // Insignificant trades end the search entirely.
        if cost < MIN_TEAM_TRADE_COST {
            return Ok(None);
        }
        if q.iter().all(|v| *v >= 0.0) {
            return Ok(Some((q, round2(cost))));
        }
    }
    Ok(None)
}

/// The bounded-budget player trade pulling the long price towards `m`.
pub fn optimal_trade_player(
    m: f64,
    n: f64,
    b: f64,
    budget_factor: f64,
) -> anyhow::Result<Option<(f64, bool, f64)>> {
    anyhow::ensure!((0.0..=1.0).contains(&m), "belief must lie in [0, 1]");
    anyhow::ensure!(b > 0.0, "liquidity parameter must be positive");

    let maker = LongShort::new(n, b);
    if (maker.spot_long() - m).abs() < PLAYER_SKIP_TOLERANCE {
        return Ok(None);
    }
    let budget = budget_factor * b;

    // How many longs shift the whole market to our belief? Widen the
    // bracket if the default one misses.
    let to_belief = |delta: f64| LongShort::new(n + delta, b).spot_long() - m;
    let n0 = match brentq(to_belief, -40.0 * b, 40.0 * b) {
        Ok(n0) => n0,
        Err(_) => brentq(to_belief, -400.0 * b, 400.0 * b)?,
    };

    if n0 >= 0.0 {
        let cost = maker.price_trade([n0, 0.0]);
        if cost > budget {
            let capped =
                brentq(|q| maker.price_trade([q, 0.0]) - budget, -40.0 * b, 40.0 * b)?;
            Ok(Some((round2(capped), true, round2(budget))))
        } else {
            Ok(Some((round2(n0), true, round2(cost))))
        }
    } else {
        let cost = maker.price_trade([0.0, -n0]);
        if cost > budget {
            let capped =
                brentq(|q| maker.price_trade([0.0, q]) - budget, -40.0 * b, 40.0 * b)?;
            Ok(Some((round2(capped), false, round2(budget))))
        } else {
            Ok(Some((round2(-n0), false, round2(cost))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn transformed_beliefs_stay_normalized() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = vec![0.1, 0.2, 0.3, 0.25, 0.15];
        for _ in 0..20 {
            let out = transform_beliefs(&m, &mut rng);
            assert_eq!(out.len(), m.len());
            let total: f64 = out.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
            assert!(out.iter().all(|v| *v > 0.0));
        }
    }

    #[test]
    fn player_trade_skips_when_market_matches_belief() {
        let result = optimal_trade_player(0.5, 0.0, 100.0, 0.01).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn player_trade_buys_longs_towards_higher_beliefs() {
        let (quantity, long, cost) = optimal_trade_player(0.6, 0.0, 1000.0, 0.01)
            .unwrap()
            .expect("a trade should happen");
        assert!(long);
        assert!(quantity > 0.0);
        assert!(cost > 0.0);
        // The budget caps spending at one percent of b.
        assert!(cost <= 10.0 + 1e-9);
    }

    #[test]
    fn player_trade_buys_shorts_towards_lower_beliefs() {
        let (quantity, long, cost) = optimal_trade_player(0.4, 0.0, 1000.0, 0.01)
            .unwrap()
            .expect("a trade should happen");
        assert!(!long);
        assert!(quantity > 0.0);
        assert!(cost > 0.0);
    }

    #[test]
    fn budget_cap_moves_the_price_less_than_the_full_trade() {
        // A large belief shift on a liquid market exhausts the budget.
        let (quantity, long, cost) = optimal_trade_player(0.95, 0.0, 1000.0, 0.01)
            .unwrap()
            .expect("a trade should happen");
        assert!(long);
        assert_eq!(cost, 10.0);
        let moved = LongShort::new(quantity, 1000.0).spot_long();
        assert!(moved > 0.5 && moved < 0.95);
    }

    #[test]
    fn team_trade_is_nonnegative_and_spends_the_budget() {
        let m = vec![0.05, 0.05, 0.1, 0.2, 0.6];
        let x = vec![0.0; 5];
        let b = 4000.0;
        let (q, cost) = optimal_trade_team(&m, &x, b, 0.01)
            .unwrap()
            .expect("a trade should happen");
        assert!(q.iter().all(|v| *v >= 0.0));
        // Cost lands on the one-percent budget up to rounding.
        assert!((cost - 40.0).abs() < 1.0);
        assert!(cost >= MIN_TEAM_TRADE_COST);
    }

    #[test]
    fn tiny_budgets_produce_no_team_trade() {
        let m = vec![0.2, 0.2, 0.2, 0.2, 0.2];
        let x = vec![0.0; 5];
        // One percent of b = 5.0 stays under the significance floor.
        let result = optimal_trade_team(&m, &x, 500.0, 0.01).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn degenerate_beliefs_are_rejected() {
        assert!(optimal_trade_team(&[0.5, 0.0], &[0.0, 0.0], 100.0, 0.01).is_err());
        assert!(optimal_trade_player(1.5, 0.0, 100.0, 0.01).is_err());
    }
}
