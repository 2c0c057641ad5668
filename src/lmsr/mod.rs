pub mod classic;
pub mod long_short;

pub use classic::{Lmsr, LmsrHistory};
pub use long_short::{LongShort, LongShortHistory};

/// Index-decay divisor for the reference claim vector on team markets.
pub const TEAM_BACK_DIVISOR: f64 = 6.0;
/// Index-decay divisor for the reference claim vector on player markets.
pub const PLAYER_BACK_DIVISOR: f64 = 3.0;

/// The fixed exponentially-weighted claim vector used for back prices:
/// `q[i] = 10 * exp(-(n - 1 - i) / divisor)`, so the weight rises towards
/// the last outcome.
pub fn q_back(n: usize, divisor: f64) -> Vec<f64> {
    (0..n)
        .map(|i| 10.0 * (-((n - 1 - i) as f64) / divisor).exp())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q_back_is_increasing_and_capped_at_ten() {
        let q = q_back(20, TEAM_BACK_DIVISOR);
        assert_eq!(q.len(), 20);
        for w in q.windows(2) {
            assert!(w[0] < w[1]);
        }
        assert!((q[19] - 10.0).abs() < 1e-12);
        assert!((q[18] - 10.0 * (-1.0f64 / 6.0).exp()).abs() < 1e-12);
    }
}
