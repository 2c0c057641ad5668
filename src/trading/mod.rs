pub mod engine;
pub mod forms;
pub mod ledger;

pub use engine::{PurchaseOutcome, TradeEngine, TradeError};
pub use forms::{ConfirmParams, FormError, PendingOrder, PurchaseForm, PurchaseParams};
pub use ledger::{Ledger, LedgerError};
