/// Logarithmic market scoring rule over a fixed inventory vector `x` and
/// liquidity parameter `b`.
///
/// All exponentials are evaluated relative to `max(x)`; without the shift
/// the cost function overflows for small `b`.
#[derive(Debug, Clone)]
pub struct Lmsr {
    x: Vec<f64>,
    b: f64,
}

fn vec_max(x: &[f64]) -> f64 {
    x.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

impl Lmsr {
    pub fn new(x: Vec<f64>, b: f64) -> Self {
        debug_assert!(!x.is_empty());
        debug_assert!(b > 0.0);
        Self { x, b }
    }

    pub fn outcomes(&self) -> usize {
        self.x.len()
    }

    /// Cost function `C(x) = x_max + b * log(sum exp((x_i - x_max) / b))`.
    pub fn cost(&self, x: &[f64]) -> f64 {
        let xmax = vec_max(x);
        xmax + self.b * x.iter().map(|xi| ((xi - xmax) / self.b).exp()).sum::<f64>().ln()
    }

    /// The price to move the inventory from `x` to `x + q`.
    pub fn price_trade(&self, q: &[f64]) -> f64 {
        debug_assert_eq!(q.len(), self.x.len());
        let shifted: Vec<f64> = self.x.iter().zip(q).map(|(xi, qi)| xi + qi).collect();
        self.cost(&shifted) - self.cost(&self.x)
    }

    /// Instantaneous value of a claim vector `q` at the current inventory.
    pub fn spot_value(&self, q: &[f64]) -> f64 {
        debug_assert_eq!(q.len(), self.x.len());
        let xmax = vec_max(&self.x);
        let mut num = 0.0;
        let mut den = 0.0;
        for (xi, qi) in self.x.iter().zip(q) {
            let w = ((xi - xmax) / self.b).exp();
            num += qi * w;
            den += w;
        }
        num / den
    }
}

/// Evaluates the spot value of one claim vector against a whole series of
/// `(x_t, b_t)` rows in a single pass, for historical price charts.
#[derive(Debug, Clone)]
pub struct LmsrHistory {
    xs: Vec<Vec<f64>>,
    bs: Vec<f64>,
}

impl LmsrHistory {
    pub fn new(xs: Vec<Vec<f64>>, bs: Vec<f64>) -> Self {
        debug_assert_eq!(xs.len(), bs.len());
        Self { xs, bs }
    }

    pub fn len(&self) -> usize {
        self.bs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bs.is_empty()
    }

    /// Spot values aligned one-to-one with the input rows.
    pub fn spot_values(&self, q: &[f64]) -> Vec<f64> {
        self.xs
            .iter()
            .zip(&self.bs)
            .map(|(x, b)| {
                let xmax = vec_max(x);
                let mut num = 0.0;
                let mut den = 0.0;
                for (xi, qi) in x.iter().zip(q) {
                    let w = ((xi - xmax) / b).exp();
                    num += qi * w;
                    den += w;
                }
                num / den
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_trade_matches_cost_difference() {
        let maker = Lmsr::new(vec![1.0, 4.0, 2.0, 0.0], 50.0);
        let q = [3.0, 0.0, 1.0, 0.5];
        let shifted: Vec<f64> = vec![4.0, 4.0, 3.0, 0.5];
        let by_cost = maker.cost(&shifted) - maker.cost(&[1.0, 4.0, 2.0, 0.0]);
        assert!((maker.price_trade(&q) - by_cost).abs() < 1e-12);
    }

    #[test]
    fn cost_is_translation_invariant() {
        let maker = Lmsr::new(vec![0.0; 5], 100.0);
        let x: Vec<f64> = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let shifted: Vec<f64> = x.iter().map(|v| v + 250.0).collect();
        assert!((maker.cost(&shifted) - (maker.cost(&x) + 250.0)).abs() < 1e-9);
    }

    #[test]
    fn uniform_inventory_spot_value_is_mean() {
        let maker = Lmsr::new(vec![0.0; 20], 4000.0);
        let q: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let mean = q.iter().sum::<f64>() / 20.0;
        assert!((maker.spot_value(&q) - mean).abs() < 1e-12);
    }

    #[test]
    fn tiny_b_is_finite() {
        // The x_max shift keeps the dominant outcome from overflowing.
        let maker = Lmsr::new(vec![100.0, 0.0, -50.0], 1e-9);
        let cost = maker.cost(&[100.0, 0.0, -50.0]);
        assert!(cost.is_finite());
        assert!((cost - 100.0).abs() < 1e-6);
        let spot = maker.spot_value(&[1.0, 0.0, 0.0]);
        assert!((spot - 1.0).abs() < 1e-9);
    }

    #[test]
    fn history_values_align_with_rows() {
        let xs = vec![vec![0.0, 0.0], vec![10.0, 0.0], vec![0.0, 10.0]];
        let bs = vec![10.0, 10.0, 10.0];
        let hist = LmsrHistory::new(xs, bs);
        let values = hist.spot_values(&[1.0, 0.0]);
        assert_eq!(values.len(), 3);
        assert!((values[0] - 0.5).abs() < 1e-12);
        assert!(values[1] > 0.5 && values[2] < 0.5);

        // Each row must agree with the scalar maker.
        let scalar = Lmsr::new(vec![10.0, 0.0], 10.0);
        assert!((values[1] - scalar.spot_value(&[1.0, 0.0])).abs() < 1e-12);
    }
}
