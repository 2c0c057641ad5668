use crate::lmsr::{self, Lmsr, LmsrHistory};

use super::model::{Hist, Snapshot, Timeframe};

/// Spot value of the fixed reference claim vector at the current inventory.
/// Player markets carry no inventory vector, so they quote no back price.
pub fn current_back_price(snapshot: &Snapshot) -> Option<f64> {
    match snapshot {
        Snapshot::Team { x, b } => {
            let q = lmsr::q_back(x.len(), lmsr::TEAM_BACK_DIVISOR);
            Some(Lmsr::new(x.clone(), *b).spot_value(&q))
        }
        Snapshot::Player { .. } => None,
    }
}

/// Back-price series over the daily history rows.
pub fn daily_back_prices(hist: &Hist) -> Option<Vec<f64>> {
    match hist {
        Hist::Team { x, b } => {
            let xs = x.get(Timeframe::Day).clone();
            let bs = b.get(Timeframe::Day).clone();
            let n = xs.first()?.len();
            let q = lmsr::q_back(n, lmsr::TEAM_BACK_DIVISOR);
            Some(LmsrHistory::new(xs, bs).spot_values(&q))
        }
        Hist::Player { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::model::Series;

    #[test]
    fn uniform_team_back_price_is_the_claim_mean() {
        let snap = Snapshot::Team { x: vec![0.0; 20], b: 4000.0 };
        let price = current_back_price(&snap).unwrap();
        let q = lmsr::q_back(20, lmsr::TEAM_BACK_DIVISOR);
        let mean = q.iter().sum::<f64>() / 20.0;
        assert!((price - mean).abs() < 1e-12);
    }

    #[test]
    fn player_markets_have_no_back_price() {
        let snap = Snapshot::Player { n: 0.0, b: 100.0 };
        assert!(current_back_price(&snap).is_none());
        assert!(daily_back_prices(&Hist::seeded(&snap)).is_none());
    }

    #[test]
    fn daily_series_aligns_with_daily_rows() {
        let hist = Hist::Team {
            x: Series {
                h: vec![],
                d: vec![vec![0.0, 0.0], vec![5.0, 0.0]],
                w: vec![],
                m: vec![],
                long_m: vec![],
            },
            b: Series { h: vec![], d: vec![10.0, 10.0], w: vec![], m: vec![], long_m: vec![] },
        };
        let prices = daily_back_prices(&hist).unwrap();
        assert_eq!(prices.len(), 2);
        // Weight shifts onto the first outcome, which carries the smaller
        // reference claim, so the back price falls.
        assert!(prices[1] < prices[0]);
    }
}
