use std::sync::Arc;

use serde_json::json;

use sportfolios_engine::auth::UserInfo;
use sportfolios_engine::docstore::{DocumentStore, MemoryDocumentStore};
use sportfolios_engine::markets::{MarketId, Quantity};
use sportfolios_engine::trading::ledger::INITIAL_CASH;
use sportfolios_engine::trading::{Ledger, LedgerError, PurchaseForm};

fn user() -> UserInfo {
    UserInfo {
        uid: "u1".to_string(),
        name: "Ed Example".to_string(),
        email: "ed@example.com".to_string(),
        email_verified: true,
    }
}

fn team_form(portfolio_id: &str, quantity: Vec<f64>, price: f64) -> PurchaseForm {
    PurchaseForm {
        uid: "u1".to_string(),
        portfolio_id: portfolio_id.to_string(),
        market: MarketId::parse("1:8:17420T").unwrap(),
        quantity: Quantity::Vector(quantity),
        price,
        team: true,
        long: None,
    }
}

fn player_form(portfolio_id: &str, quantity: f64, long: bool) -> PurchaseForm {
    PurchaseForm {
        uid: "u1".to_string(),
        portfolio_id: portfolio_id.to_string(),
        market: MarketId::parse("9:8:17420P").unwrap(),
        quantity: Quantity::Scalar(quantity),
        price: 0.0,
        team: false,
        long: Some(long),
    }
}

async fn fresh_portfolio(docs: &Arc<MemoryDocumentStore>, ledger: &Ledger) -> String {
    let id = ledger.create_portfolio(&user(), "My Team", true, "a portfolio").await.unwrap();
    let doc = docs.get("portfolios", &id).await.unwrap().unwrap();
    assert_eq!(doc["cash"].as_f64().unwrap(), INITIAL_CASH);
    id
}

#[tokio::test]
async fn create_portfolio_initializes_the_document() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let ledger = Ledger::new(docs.clone());
    let id = fresh_portfolio(&docs, &ledger).await;

    let doc = docs.get("portfolios", &id).await.unwrap().unwrap();
    assert_eq!(doc["user"], json!("u1"));
    assert_eq!(doc["current_value"].as_f64().unwrap(), INITIAL_CASH);
    assert!(doc["active"].as_bool().unwrap());
    assert!(doc["holdings"].as_object().unwrap().is_empty());
    assert!(doc["transactions"].as_array().unwrap().is_empty());
    for tf in ["d", "w", "m", "M"] {
        assert_eq!(doc[&format!("returns_{tf}")].as_f64().unwrap(), 0.0);
    }
    let terms: Vec<String> = doc["search_terms"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(terms.contains(&"my".to_string()));
    assert!(terms.contains(&"my team".to_string()));
    assert!(terms.contains(&"ed".to_string()));

    // The portfolio id is registered against the user.
    let user_doc = docs.get("users", "u1").await.unwrap().unwrap();
    assert_eq!(user_doc["portfolios"], json!([id]));
}

#[tokio::test]
async fn apply_transaction_debits_cash_and_appends_history() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let ledger = Ledger::new(docs.clone());
    let id = fresh_portfolio(&docs, &ledger).await;

    let form = team_form(&id, vec![1.0, 0.0, 2.0], 0.05);
    ledger.apply_transaction(&form, 12.25).await.unwrap();

    let doc = docs.get("portfolios", &id).await.unwrap().unwrap();
    assert!((doc["cash"].as_f64().unwrap() - (INITIAL_CASH - 12.25)).abs() < 1e-12);
    assert_eq!(doc["holdings"]["1:8:17420T"], json!([1.0, 0.0, 2.0]));

    let transactions = doc["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["market"], json!("1:8:17420T"));
    assert_eq!(transactions[0]["price"].as_f64().unwrap(), 12.25);
}

#[tokio::test]
async fn opposing_trades_net_out_and_delete_the_holding() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let ledger = Ledger::new(docs.clone());
    let id = fresh_portfolio(&docs, &ledger).await;

    ledger.apply_transaction(&player_form(&id, 5.0, true), 2.5).await.unwrap();
    let doc = docs.get("portfolios", &id).await.unwrap().unwrap();
    assert_eq!(doc["holdings"]["9:8:17420P"].as_f64().unwrap(), 5.0);

    // Five shorts collapse the net position to zero.
    ledger.apply_transaction(&player_form(&id, 5.0, false), 2.5).await.unwrap();
    let doc = docs.get("portfolios", &id).await.unwrap().unwrap();
    assert!(doc["holdings"].as_object().unwrap().is_empty());
    assert_eq!(doc["transactions"].as_array().unwrap().len(), 2);
    assert!((doc["cash"].as_f64().unwrap() - (INITIAL_CASH - 5.0)).abs() < 1e-12);
}

#[tokio::test]
async fn insufficient_funds_are_rejected_before_any_write() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let ledger = Ledger::new(docs.clone());
    let id = fresh_portfolio(&docs, &ledger).await;

    let err = ledger.apply_transaction(&team_form(&id, vec![1.0], 0.0), 600.0).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    let doc = docs.get("portfolios", &id).await.unwrap().unwrap();
    assert_eq!(doc["cash"].as_f64().unwrap(), INITIAL_CASH);
    assert!(doc["transactions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn ownership_is_enforced() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let ledger = Ledger::new(docs.clone());
    let id = fresh_portfolio(&docs, &ledger).await;

    let mut form = team_form(&id, vec![1.0], 0.0);
    form.uid = "intruder".to_string();
    let err = ledger.apply_transaction(&form, 1.0).await.unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));

    assert!(matches!(
        ledger.check_owner("nope", "u1").await.unwrap_err(),
        LedgerError::PortfolioMissing(_)
    ));
    assert!(ledger.check_owner(&id, "u1").await.is_ok());
}
