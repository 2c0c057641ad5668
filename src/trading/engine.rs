use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::auth::UserInfo;
use crate::lmsr::{Lmsr, LongShort};
use crate::markets::{Quantity, Snapshot};
use crate::storage::{OrderRecorder, RedisStore, StoreError, UndoQueue};
use crate::utils::time::unix_now;

use super::forms::{prices_consistent, PendingOrder, PurchaseForm};
use super::ledger::{Ledger, LedgerError};

/// Attempt bounds for the optimistic commit and its compensating undo.
const COMMIT_ATTEMPTS: u32 = 100;
const UNDO_ATTEMPTS: u32 = 200;

/// How long a disagreed purchase stays open for confirmation.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("the market {0} cannot be found or is invalid")]
    MarketNotFound(String),

    #[error("there is currently too much trading activity to complete this purchase")]
    Contention,

    #[error("quantity does not fit the market: {0}")]
    Mismatch(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("this order could not be confirmed: the cancellation has already happened")]
    ConfirmationTooLate,

    #[error("the user id supplied does not match that of the original order")]
    Unauthorized,
}

impl From<StoreError> for TradeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => TradeError::MarketNotFound(key),
            StoreError::Contention(_) => TradeError::Contention,
            StoreError::Invalid(msg) => TradeError::Mismatch(msg),
            other => TradeError::Store(other),
        }
    }
}

/// Result of an attempted purchase, as returned to the client.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PurchaseOutcome {
    pub success: bool,
    pub price: f64,
    #[serde(rename = "cancelId")]
    pub cancel_id: Option<String>,
}

/// Quote-commit-confirm pipeline over one market at a time.
///
/// The inventory change always commits once the optimistic lock is won;
/// price disagreement only decides whether a compensating undo is
/// scheduled alongside a pending-confirmation record.
pub struct TradeEngine {
    store: RedisStore,
    queue: UndoQueue,
    ledger: Ledger,
    recorder: Option<OrderRecorder>,
}

impl TradeEngine {
    pub fn new(
        store: RedisStore,
        ledger: Ledger,
        recorder: Option<OrderRecorder>,
    ) -> Self {
        let queue = UndoQueue::new(&store);
        Self { store, queue, ledger, recorder }
    }

    /// Commit the inventory change and return the price quoted against the
    /// snapshot the commit actually won.
    pub async fn make_purchase(&self, form: &PurchaseForm) -> Result<f64, TradeError> {
        if !self.store.exists(&form.market).await.map_err(TradeError::from)? {
            return Err(TradeError::MarketNotFound(form.market.to_string()));
        }

        let delta = form.signed_quantity();
        let mut price = 0.0;
        self.store
            .watch_update(&form.market, COMMIT_ATTEMPTS, |current| {
                price = quote(&current, form).map_err(|e| StoreError::Invalid(e.to_string()))?;
                apply_trade(&current, &delta).map_err(|e| StoreError::Invalid(e.to_string()))
            })
            .await?;
        Ok(price)
    }

    /// Reverse a committed purchase. Safe to run exactly once per commit;
    /// the queue and the confirmation path race for that right via the
    /// job claim.
    pub async fn undo_purchase(&self, form: &PurchaseForm) -> Result<(), TradeError> {
        let delta = form.signed_quantity().negated();
        self.store
            .watch_update(&form.market, UNDO_ATTEMPTS, |current| {
                apply_trade(&current, &delta).map_err(|e| StoreError::Invalid(e.to_string()))
            })
            .await?;
        Ok(())
    }

    /// Full purchase flow: commit, then either settle into the portfolio
    /// (agreed price) or park the order behind a cancel id with an undo
    /// scheduled at the confirmation deadline.
    pub async fn attempt_purchase(
        &self,
        user: &UserInfo,
        form: &PurchaseForm,
    ) -> Result<PurchaseOutcome, TradeError> {
        let price = self.make_purchase(form).await?;

        if prices_consistent(form.price, price) {
            if let Err(err) = self.ledger.apply_transaction(form, price).await {
                self.undo_after_failure(form).await;
                return Err(err.into());
            }
            self.record_order(user, form, price).await;
            Ok(PurchaseOutcome { success: true, price, cancel_id: None })
        } else {
            let job_id = self.queue.schedule(form, CONFIRM_WINDOW).await?;
            let cancel_id = Uuid::new_v4().simple().to_string();
            let pending = PendingOrder { form: form.clone(), job_id, price };
            self.store
                .set_pending(&cancel_id, &pending, CONFIRM_WINDOW.as_secs())
                .await?;

            tracing::info!(
                target: "trade",
                market = %form.market,
                cancel_id = %cancel_id,
                expected = form.price,
                quoted = price,
                "price disagreement, undo scheduled"
            );
            Ok(PurchaseOutcome { success: false, price, cancel_id: Some(cancel_id) })
        }
    }

    /// Resolve a pending order. Each cancel id resolves at most once.
    pub async fn confirm_order(
        &self,
        user: &UserInfo,
        cancel_id: &str,
        confirm: bool,
    ) -> Result<&'static str, TradeError> {
        let pending: Option<PendingOrder> = self.store.take_pending(cancel_id).await?;
        let Some(pending) = pending else {
            return Err(TradeError::ConfirmationTooLate);
        };
        if pending.form.uid != user.uid {
            return Err(TradeError::Unauthorized);
        }

        if confirm {
            if !self.queue.cancel(&pending.job_id).await? {
                return Err(TradeError::ConfirmationTooLate);
            }
            if let Err(err) = self.ledger.apply_transaction(&pending.form, pending.price).await {
                self.undo_after_failure(&pending.form).await;
                return Err(err.into());
            }
            self.record_order(user, &pending.form, pending.price).await;
            Ok("Order confirmed")
        } else {
            // If the scheduled undo already fired there is nothing to do.
            if self.queue.cancel(&pending.job_id).await? {
                self.undo_purchase(&pending.form).await?;
            }
            Ok("Order cancelled")
        }
    }

    async fn undo_after_failure(&self, form: &PurchaseForm) {
        if let Err(err) = self.undo_purchase(form).await {
            tracing::error!(
                target: "trade",
                market = %form.market,
                %err,
                "failed to undo purchase after ledger rejection"
            );
        }
    }

    async fn record_order(&self, user: &UserInfo, form: &PurchaseForm, price: f64) {
        let Some(recorder) = &self.recorder else { return };
        let quantity = serde_json::to_string(&form.quantity).unwrap_or_default();
        if let Err(err) = recorder
            .log_order(
                &user.name,
                &user.email,
                &user.uid,
                &form.portfolio_id,
                form.market.as_str(),
                &quantity,
                price,
            )
            .await
        {
            tracing::error!(target: "trade", market = %form.market, %err, "order audit write failed");
        }
    }
}

/// Price a purchase against a snapshot without mutating it.
pub fn quote(snapshot: &Snapshot, form: &PurchaseForm) -> Result<f64, TradeError> {
    match (snapshot, &form.quantity) {
        (Snapshot::Team { x, b }, Quantity::Vector(q)) if q.len() == x.len() => {
            Ok(Lmsr::new(x.clone(), *b).price_trade(q))
        }
        (Snapshot::Player { n, b }, Quantity::Scalar(q)) => {
            let pair = if form.long.unwrap_or(true) { [*q, 0.0] } else { [0.0, *q] };
            Ok(LongShort::new(*n, *b).price_trade(pair))
        }
        _ => Err(TradeError::Mismatch(format!("market {}", form.market))),
    }
}

/// Shift a snapshot's inventory by a signed delta.
pub fn apply_trade(snapshot: &Snapshot, delta: &Quantity) -> Result<Snapshot, TradeError> {
    match (snapshot, delta) {
        (Snapshot::Team { x, b }, Quantity::Vector(q)) if q.len() == x.len() => {
            Ok(Snapshot::Team { x: x.iter().zip(q).map(|(xi, qi)| xi + qi).collect(), b: *b })
        }
        (Snapshot::Player { n, b }, Quantity::Scalar(q)) => {
            Ok(Snapshot::Player { n: n + q, b: *b })
        }
        _ => Err(TradeError::Mismatch("inventory and quantity shapes differ".to_string())),
    }
}

/// Service the scheduled-undo queue: claim due jobs and run their
/// compensating undos. Runs alongside the HTTP surface.
pub async fn run_undo_worker(engine: Arc<TradeEngine>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let due: Vec<PurchaseForm> = match engine.queue.claim_due(unix_now(), 16).await {
            Ok(due) => due,
            Err(err) => {
                tracing::error!(target: "trade", %err, "failed to poll undo queue");
                continue;
            }
        };
        for form in due {
            match engine.undo_purchase(&form).await {
                Ok(()) => tracing::info!(
                    target: "trade",
                    market = %form.market,
                    "scheduled undo executed"
                ),
                Err(err) => tracing::error!(
                    target: "trade",
                    market = %form.market,
                    %err,
                    "scheduled undo failed"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::MarketId;

    fn team_form(quantity: Vec<f64>, price: f64) -> PurchaseForm {
        PurchaseForm {
            uid: "u1".to_string(),
            portfolio_id: "p1".to_string(),
            market: MarketId::parse("1:8:17420T").unwrap(),
            quantity: Quantity::Vector(quantity),
            price,
            team: true,
            long: None,
        }
    }

    fn player_form(quantity: f64, long: bool) -> PurchaseForm {
        PurchaseForm {
            uid: "u1".to_string(),
            portfolio_id: "p1".to_string(),
            market: MarketId::parse("9:8:17420P").unwrap(),
            quantity: Quantity::Scalar(quantity),
            price: 0.0,
            team: false,
            long: Some(long),
        }
    }

    #[test]
    fn team_quote_matches_cost_difference() {
        let snapshot = Snapshot::Team { x: vec![0.0; 20], b: 4000.0 };
        let mut q = vec![0.0; 20];
        q[0] = 1.0;
        let form = team_form(q.clone(), 0.05);
        let price = quote(&snapshot, &form).unwrap();
        let maker = Lmsr::new(vec![0.0; 20], 4000.0);
        assert!((price - maker.price_trade(&q)).abs() < 1e-15);
        assert!((price - 0.05).abs() < 1e-4);
    }

    #[test]
    fn player_quote_prices_shorts_as_offset_longs() {
        let snapshot = Snapshot::Player { n: 0.0, b: 100.0 };
        let long = quote(&snapshot, &player_form(10.0, true)).unwrap();
        let short = quote(&snapshot, &player_form(10.0, false)).unwrap();
        let maker = LongShort::new(0.0, 100.0);
        assert!((long - maker.price_trade([10.0, 0.0])).abs() < 1e-12);
        assert!((short - maker.price_trade([0.0, 10.0])).abs() < 1e-12);
        // Flat market: longs and shorts cost the same.
        assert!((long - short).abs() < 1e-9);
    }

    #[test]
    fn commit_then_undo_restores_the_snapshot_exactly() {
        let snapshot = Snapshot::Team { x: vec![3.0, 1.0, 0.0], b: 200.0 };
        let form = team_form(vec![2.0, 0.0, 1.5], 1.0);
        let delta = form.signed_quantity();
        let committed = apply_trade(&snapshot, &delta).unwrap();
        let restored = apply_trade(&committed, &delta.negated()).unwrap();
        assert_eq!(
            serde_json::to_string(&restored).unwrap(),
            serde_json::to_string(&snapshot).unwrap()
        );
    }

    #[test]
    fn short_purchases_move_inventory_down() {
        let snapshot = Snapshot::Player { n: 5.0, b: 100.0 };
        let form = player_form(3.0, false);
        let committed = apply_trade(&snapshot, &form.signed_quantity()).unwrap();
        assert_eq!(committed, Snapshot::Player { n: 2.0, b: 100.0 });
        let undone = apply_trade(&committed, &form.signed_quantity().negated()).unwrap();
        assert_eq!(undone, snapshot);
    }

    #[test]
    fn mismatched_shapes_do_not_trade() {
        let snapshot = Snapshot::Team { x: vec![0.0, 0.0], b: 10.0 };
        let form = team_form(vec![1.0], 0.5);
        assert!(quote(&snapshot, &form).is_err());
        assert!(apply_trade(&snapshot, &form.signed_quantity()).is_err());
    }
}
