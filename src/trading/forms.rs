use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::markets::{InvalidMarket, MarketId, MarketKind, Quantity};

#[derive(Debug, Error)]
pub enum FormError {
    #[error("{0} is missing from the form")]
    MissingField(&'static str),

    #[error(transparent)]
    InvalidMarket(#[from] InvalidMarket),

    #[error("malformed form field: {0}")]
    Malformed(String),
}

/// Raw `/purchase` form fields as they arrive on the wire. `quantity` and
/// `long` are JSON-encoded inside the urlencoded form.
#[derive(Debug, Deserialize)]
pub struct PurchaseParams {
    #[serde(rename = "portfolioId")]
    pub portfolio_id: Option<String>,
    pub market: Option<String>,
    pub quantity: Option<String>,
    pub price: Option<String>,
    pub long: Option<String>,
}

/// Raw `/confirm_order` form fields.
#[derive(Debug, Deserialize)]
pub struct ConfirmParams {
    #[serde(rename = "cancelId")]
    pub cancel_id: Option<String>,
    pub confirm: Option<String>,
}

/// A validated purchase. `team` is derived from the market id; `long` is
/// present exactly when the market is a player market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseForm {
    pub uid: String,
    #[serde(rename = "portfolioId")]
    pub portfolio_id: String,
    pub market: MarketId,
    pub quantity: Quantity,
    pub price: f64,
    pub team: bool,
    pub long: Option<bool>,
}

/// What a `cancelId` resolves to while a disagreed purchase awaits
/// confirmation: the form, the scheduled undo job, and the settled price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub form: PurchaseForm,
    pub job_id: String,
    pub price: f64,
}

impl PurchaseForm {
    pub fn from_params(uid: &str, params: PurchaseParams) -> Result<Self, FormError> {
        let portfolio_id = params.portfolio_id.ok_or(FormError::MissingField("portfolioId"))?;
        let raw_market = params.market.ok_or(FormError::MissingField("market"))?;
        let raw_quantity = params.quantity.ok_or(FormError::MissingField("quantity"))?;
        let raw_price = params.price.ok_or(FormError::MissingField("price"))?;

        let market = MarketId::parse(&raw_market)?;
        let team = market.kind() == MarketKind::Team;

        if !team && params.long.is_none() {
            return Err(FormError::MissingField("long"));
        }

        let quantity: Quantity = serde_json::from_str(&raw_quantity)
            .map_err(|_| FormError::Malformed(format!("quantity ({raw_quantity})")))?;
        let price: f64 = raw_price
            .parse()
            .map_err(|_| FormError::Malformed(format!("price ({raw_price})")))?;
        let long = match params.long {
            Some(raw) => Some(
                serde_json::from_str::<bool>(&raw)
                    .map_err(|_| FormError::Malformed(format!("long ({raw})")))?,
            ),
            None => None,
        };

        match (&quantity, team) {
            (Quantity::Vector(_), true) | (Quantity::Scalar(_), false) => {}
            _ => {
                return Err(FormError::Malformed(format!(
                    "quantity shape does not match market {market}"
                )))
            }
        }
        if !quantity.is_finite() || !price.is_finite() {
            return Err(FormError::Malformed("quantity and price must be finite".to_string()));
        }

        Ok(Self { uid: uid.to_string(), portfolio_id, market, quantity, price, team, long })
    }

    /// The inventory delta of this purchase: the claim vector itself for
    /// teams, the scalar signed by direction for players.
    pub fn signed_quantity(&self) -> Quantity {
        match (&self.quantity, self.long) {
            (Quantity::Scalar(q), Some(false)) => Quantity::Scalar(-q),
            (q, _) => q.clone(),
        }
    }
}

/// Round up to two decimal places, unless the value is already exact at
/// two decimals. The exactness guard matters: `0.05 * 100` is fractionally
/// above 5 in floating point and must not round to 0.06.
pub fn round_decimals_up(price: f64) -> f64 {
    let scaled = price * 100.0;
    if scaled.trunc() / 100.0 == price {
        return price;
    }
    scaled.ceil() / 100.0
}

/// Whether the user-supplied price and the engine's quote agree: the
/// rounded-up expectation may exceed the quote by strictly less than one
/// cent, and never undershoot it.
pub fn prices_consistent(expected: f64, true_price: f64) -> bool {
    let profit = round_decimals_up(expected) - true_price;
    (0.0..0.01).contains(&profit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(
        portfolio: Option<&str>,
        market: Option<&str>,
        quantity: Option<&str>,
        price: Option<&str>,
        long: Option<&str>,
    ) -> PurchaseParams {
        PurchaseParams {
            portfolio_id: portfolio.map(String::from),
            market: market.map(String::from),
            quantity: quantity.map(String::from),
            price: price.map(String::from),
            long: long.map(String::from),
        }
    }

    #[test]
    fn validates_a_team_purchase() {
        let form = PurchaseForm::from_params(
            "u1",
            params(Some("p1"), Some("1:8:17420T"), Some("[1.0, 0.0]"), Some("0.05"), None),
        )
        .unwrap();
        assert!(form.team);
        assert_eq!(form.signed_quantity(), Quantity::Vector(vec![1.0, 0.0]));
    }

    #[test]
    fn player_purchase_requires_long() {
        let err = PurchaseForm::from_params(
            "u1",
            params(Some("p1"), Some("9:8:17420P"), Some("4"), Some("2.0"), None),
        )
        .unwrap_err();
        assert!(matches!(err, FormError::MissingField("long")));

        let form = PurchaseForm::from_params(
            "u1",
            params(Some("p1"), Some("9:8:17420P"), Some("4"), Some("2.0"), Some("false")),
        )
        .unwrap();
        assert_eq!(form.signed_quantity(), Quantity::Scalar(-4.0));
    }

    #[test]
    fn rejects_mismatched_quantity_shapes() {
        let err = PurchaseForm::from_params(
            "u1",
            params(Some("p1"), Some("1:8:17420T"), Some("3.0"), Some("0.05"), None),
        )
        .unwrap_err();
        assert!(matches!(err, FormError::Malformed(_)));
    }

    #[test]
    fn rejects_malformed_market_strings() {
        let err = PurchaseForm::from_params(
            "u1",
            params(Some("p1"), Some("1:8:17420"), Some("[1]"), Some("0.05"), None),
        )
        .unwrap_err();
        assert!(matches!(err, FormError::InvalidMarket(_)));
    }

    #[test]
    fn rounding_up_keeps_exact_cents() {
        assert_eq!(round_decimals_up(0.05), 0.05);
        assert_eq!(round_decimals_up(0.04), 0.04);
        assert_eq!(round_decimals_up(12.0), 12.0);
        assert!((round_decimals_up(0.051) - 0.06).abs() < 1e-12);
        assert!((round_decimals_up(0.0500006) - 0.06).abs() < 1e-12);
    }

    #[test]
    fn agreement_follows_the_ceiling_rule() {
        // Expectation equal to the quote, both fractionally above a cent.
        assert!(prices_consistent(0.050_000_6, 0.050_000_6));
        // A whole-cent expectation against a quote just above it disagrees.
        assert!(!prices_consistent(0.04, 0.050_000_3));
        assert!(!prices_consistent(0.05, 0.050_000_3));
        // Expectation rounded up may exceed the quote by < 1 cent.
        assert!(prices_consistent(0.055, 0.051));
        // But never undershoot.
        assert!(!prices_consistent(0.03, 0.05));
    }
}
