use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::UserInfo;
use crate::docstore::{DocError, DocUpdate, DocumentStore};
use crate::markets::Quantity;
use crate::utils::time::unix_now;

use super::forms::PurchaseForm;

/// Starting cash balance of every portfolio.
pub const INITIAL_CASH: f64 = 500.0;

/// Holdings whose every component is within this of zero are deleted.
const ZERO_TOLERANCE: f64 = 5e-3;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("the portfolio {0} cannot be found")]
    PortfolioMissing(String),

    #[error("the portfolio {portfolio} does not belong to user {uid}")]
    Unauthorized { portfolio: String, uid: String },

    #[error("insufficient funds: cash {cash:.2} is below price {price:.2}")]
    InsufficientFunds { cash: f64, price: f64 },

    #[error("malformed portfolio document: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Doc(#[from] DocError),
}

/// Applies committed trades to portfolio documents and creates new
/// portfolios, keeping the cash and holdings fields consistent.
#[derive(Clone)]
pub struct Ledger {
    docs: Arc<dyn DocumentStore>,
}

impl Ledger {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Confirm the portfolio exists and belongs to `uid`.
    pub async fn check_owner(&self, portfolio_id: &str, uid: &str) -> Result<(), LedgerError> {
        let doc = self
            .docs
            .get("portfolios", portfolio_id)
            .await?
            .ok_or_else(|| LedgerError::PortfolioMissing(portfolio_id.to_string()))?;
        if doc.get("user").and_then(Value::as_str) != Some(uid) {
            return Err(LedgerError::Unauthorized {
                portfolio: portfolio_id.to_string(),
                uid: uid.to_string(),
            });
        }
        Ok(())
    }

    /// Apply a settled purchase: debit cash, merge the holding, and append
    /// the transaction, all in one document update.
    pub async fn apply_transaction(
        &self,
        form: &PurchaseForm,
        settled_price: f64,
    ) -> Result<(), LedgerError> {
        let doc = self
            .docs
            .get("portfolios", &form.portfolio_id)
            .await?
            .ok_or_else(|| LedgerError::PortfolioMissing(form.portfolio_id.clone()))?;

        if doc.get("user").and_then(Value::as_str) != Some(form.uid.as_str()) {
            return Err(LedgerError::Unauthorized {
                portfolio: form.portfolio_id.clone(),
                uid: form.uid.clone(),
            });
        }

        let cash = doc
            .get("cash")
            .and_then(Value::as_f64)
            .ok_or_else(|| LedgerError::Corrupt("cash is not a number".to_string()))?;
        if cash < settled_price {
            return Err(LedgerError::InsufficientFunds { cash, price: settled_price });
        }

        let market_key = form.market.as_str();
        let old = match doc.get("holdings").and_then(|h| h.get(market_key)) {
            Some(value) => Some(
                serde_json::from_value::<Quantity>(value.clone())
                    .map_err(|_| LedgerError::Corrupt(format!("holding {market_key}")))?,
            ),
            None => None,
        };

        let delta = form.signed_quantity();
        let merged = merge_holdings(old.as_ref(), &delta)?;

        let holdings_path = format!("holdings.{market_key}");
        let mut update = DocUpdate::new().set("cash", cash - settled_price);
        update = match merged {
            Some(quantity) => update.set(holdings_path, quantity),
            None => update.delete(holdings_path),
        };
        update = update.array_union(
            "transactions",
            vec![json!({
                "market": market_key,
                "quantity": delta,
                "price": settled_price,
                "time": unix_now(),
            })],
        );

        self.docs.update("portfolios", &form.portfolio_id, update).await?;
        Ok(())
    }

    /// Create a portfolio with the standard opening balance and register it
    /// against the owning user.
    pub async fn create_portfolio(
        &self,
        user: &UserInfo,
        name: &str,
        public: bool,
        description: &str,
    ) -> Result<String, LedgerError> {
        tracing::info!(target: "trade", uid = %user.uid, name, public, "creating portfolio");

        let doc = json!({
            "user": &user.uid,
            "name": name,
            "public": public,
            "username": &user.name,
            "description": description,
            "cash": INITIAL_CASH,
            "current_value": INITIAL_CASH,
            "holdings": {},
            "transactions": [],
            "current_values": {},
            "returns_d": 0.0,
            "returns_w": 0.0,
            "returns_m": 0.0,
            "returns_M": 0.0,
            "created": unix_now() as f64,
            "active": true,
            "colours": {"cash": "#00bb01"},
            "comments": {},
            "search_terms": search_terms(&[name, &user.name]),
        });

        let portfolio_id = self.docs.add("portfolios", doc).await?;
        self.docs
            .update(
                "users",
                &user.uid,
                DocUpdate::new().array_union("portfolios", vec![json!(portfolio_id)]),
            )
            .await?;

        Ok(portfolio_id)
    }
}

/// Element-wise holding merge. `None` means the position nets out and the
/// field should be deleted.
pub fn merge_holdings(
    old: Option<&Quantity>,
    delta: &Quantity,
) -> Result<Option<Quantity>, LedgerError> {
    let merged = match (old, delta) {
        (None, q) => q.clone(),
        (Some(Quantity::Vector(a)), Quantity::Vector(b)) if a.len() == b.len() => {
            Quantity::Vector(a.iter().zip(b).map(|(x, y)| x + y).collect())
        }
        (Some(Quantity::Scalar(a)), Quantity::Scalar(b)) => Quantity::Scalar(a + b),
        _ => return Err(LedgerError::Corrupt("holdings shape mismatch".to_string())),
    };

    let nets_out = match &merged {
        Quantity::Vector(v) => v.iter().all(|q| q.abs() < ZERO_TOLERANCE),
        Quantity::Scalar(q) => q.abs() < ZERO_TOLERANCE,
    };
    Ok(if nets_out { None } else { Some(merged) })
}

/// Lower-cased, diacritic-folded prefixes of every whitespace split of the
/// given names (and the names themselves), for prefix search.
pub fn search_terms(names: &[&str]) -> Vec<String> {
    let mut expanded: Vec<String> = Vec::new();
    for name in names {
        if name.trim().is_empty() {
            continue;
        }
        for part in name.split_whitespace() {
            expanded.push(part.to_string());
        }
        expanded.push(name.to_string());
    }
    let folded: Vec<String> = expanded.iter().map(|s| fold_diacritics(s)).collect();
    expanded.extend(folded);

    let mut terms = BTreeSet::new();
    for name in &expanded {
        let chars: Vec<char> = name.chars().collect();
        for i in 1..=chars.len() {
            let prefix: String = chars[..i].iter().collect();
            let prefix = prefix.to_lowercase().trim().to_string();
            if !prefix.is_empty() {
                terms.insert(prefix);
            }
        }
    }
    terms.into_iter().collect()
}

/// ASCII-fold the Latin accents that show up in player and user names.
fn fold_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
            'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' => 'o',
            'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' | 'Ø' => 'O',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            'ñ' => 'n',
            'Ñ' => 'N',
            'ý' | 'ÿ' => 'y',
            'š' => 's',
            'Š' => 'S',
            'ž' => 'z',
            'Ž' => 'Z',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merging_opposing_positions_deletes_the_holding() {
        let old = Quantity::Vector(vec![1.0, 2.0]);
        let delta = Quantity::Vector(vec![-1.0, -2.0005]);
        assert_eq!(merge_holdings(Some(&old), &delta).unwrap(), None);

        let kept = merge_holdings(Some(&old), &Quantity::Vector(vec![0.0, 1.0])).unwrap();
        assert_eq!(kept, Some(Quantity::Vector(vec![1.0, 3.0])));
    }

    #[test]
    fn scalar_holdings_merge_signed() {
        let old = Quantity::Scalar(4.0);
        assert_eq!(
            merge_holdings(Some(&old), &Quantity::Scalar(-1.5)).unwrap(),
            Some(Quantity::Scalar(2.5))
        );
        assert_eq!(merge_holdings(Some(&old), &Quantity::Scalar(-4.0)).unwrap(), None);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let old = Quantity::Vector(vec![1.0]);
        assert!(merge_holdings(Some(&old), &Quantity::Scalar(1.0)).is_err());
    }

    #[test]
    fn search_terms_cover_prefixes_and_folding() {
        let terms = search_terms(&["José Cup", "ed"]);
        for expected in ["j", "jo", "jos", "josé", "jose", "c", "cup", "josé cup", "e", "ed"] {
            assert!(terms.contains(&expected.to_string()), "missing {expected}");
        }
        // Everything is lower-cased.
        assert!(terms.iter().all(|t| t == &t.to_lowercase()));
    }
}
