/// Long/short market maker for binary player markets. `n` is the net long
/// position sold by the market (negative when net short), `b` the liquidity
/// parameter.
#[derive(Debug, Clone)]
pub struct LongShort {
    n: f64,
    b: f64,
    long_price: f64,
}

/// Instantaneous long price as a function of `k = n / b`.
fn long_price(k: f64) -> f64 {
    if k == 0.0 {
        0.5
    } else if k > 0.0 {
        ((k - 1.0) + (-k).exp()) / (k * (1.0 - (-k).exp()))
    } else {
        (k.exp() * (k - 1.0) + 1.0) / (k * (k.exp() - 1.0))
    }
}

impl LongShort {
    pub fn new(n: f64, b: f64) -> Self {
        debug_assert!(b > 0.0);
        Self { n, b, long_price: long_price(n / b) }
    }

    pub fn spot_long(&self) -> f64 {
        self.long_price
    }

    pub fn spot_short(&self) -> f64 {
        1.0 - self.long_price
    }

    /// Instantaneous value of a `[longs, shorts]` claim pair.
    pub fn spot_value(&self, q: [f64; 2]) -> f64 {
        let (c_min, c_max) = (q[0].min(q[1]), q[0].max(q[1]));
        if q[0] >= q[1] {
            c_min + self.long_price * (c_max - c_min)
        } else {
            c_max - self.long_price * (c_max - c_min)
        }
    }

    /// Cost of buying `q = [longs, shorts]`. Buying `n` shorts costs
    /// `n + f(-n)` where `f` prices longs.
    pub fn price_trade(&self, q: [f64; 2]) -> f64 {
        self.price_longs(q[0]) + q[1] + self.price_longs(-q[1])
    }

    /// Closed-form cost of going long `n` units, branching on the signs of
    /// the net position and the trade, with the exact offset case `N == -n`.
    fn price_longs(&self, n: f64) -> f64 {
        let big_n = self.n;
        let b = self.b;

        if n == 0.0 {
            0.0
        } else if big_n == 0.0 {
            if n < 0.0 {
                b * (b * ((n / b).exp() - 1.0) / n).ln()
            } else {
                b * (b * (1.0 - (-n / b).exp()) / (n * (-n / b).exp())).ln()
            }
        } else if big_n < 0.0 {
            if big_n == -n {
                b * (big_n / (b * ((big_n / b).exp() - 1.0))).ln()
            } else {
                b * (big_n / (big_n + n) * (((big_n + n) / b).exp() - 1.0)
                    / ((big_n / b).exp() - 1.0))
                    .ln()
            }
        } else if big_n == -n {
            b * (big_n * (-big_n / b).exp() / (b * (1.0 - (-big_n / b).exp()))).ln()
        } else {
            b * (big_n / (big_n + n) * ((n / b).exp() - (-big_n / b).exp())
                / (1.0 - (-big_n / b).exp()))
                .ln()
        }
    }
}

/// Long-price series over parallel `(n_t, b_t)` rows.
#[derive(Debug, Clone)]
pub struct LongShortHistory {
    long_prices: Vec<f64>,
}

impl LongShortHistory {
    pub fn new(ns: &[f64], bs: &[f64]) -> Self {
        debug_assert_eq!(ns.len(), bs.len());
        let long_prices = ns.iter().zip(bs).map(|(n, b)| long_price(n / b)).collect();
        Self { long_prices }
    }

    pub fn len(&self) -> usize {
        self.long_prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.long_prices.is_empty()
    }

    pub fn spot_longs(&self) -> &[f64] {
        &self.long_prices
    }

    /// Value history of a `[longs, shorts]` claim pair, aligned with rows.
    pub fn spot_values(&self, q: [f64; 2]) -> Vec<f64> {
        let (c_min, c_max) = (q[0].min(q[1]), q[0].max(q[1]));
        self.long_prices
            .iter()
            .map(|lp| {
                if q[0] >= q[1] {
                    c_min + lp * (c_max - c_min)
                } else {
                    c_max - lp * (c_max - c_min)
                }
            })
            .collect()
    }
}
