use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::auth::{AdminCredential, HttpTokenVerifier, TokenVerifier};
use crate::docstore;
use crate::storage::{OrderRecorder, RedisStore};
use crate::trading::engine::run_undo_worker;
use crate::trading::{Ledger, TradeEngine};
use crate::types::AppConfig;

pub mod error;
pub mod handlers;

pub use error::ApiError;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: RedisStore,
    pub engine: Arc<TradeEngine>,
    pub ledger: Ledger,
    pub verifier: Arc<dyn TokenVerifier>,
    pub admin: Arc<AdminCredential>,
    pub data_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/current_holdings", get(handlers::current_holdings))
        .route("/historical_holdings", get(handlers::historical_holdings))
        .route("/current_back_prices", get(handlers::current_back_prices))
        .route("/daily_back_prices", get(handlers::daily_back_prices))
        .route("/purchase", post(handlers::purchase))
        .route("/confirm_order", post(handlers::confirm_order))
        .route("/create_portfolio", post(handlers::create_portfolio))
        .route("/init_redis", get(handlers::init_redis))
        .route("/update_b", post(handlers::update_b))
        .with_state(state)
}

/// Run the HTTP surface plus the scheduled-undo worker.
pub async fn serve(cfg: AppConfig) -> anyhow::Result<()> {
    let store = RedisStore::connect(&cfg.redis).await?;
    store.init_counters().await?;

    let docs = docstore::from_config(&cfg.docstore)?;
    let ledger = Ledger::new(docs);
    let recorder = OrderRecorder::connect(&cfg.audit.database_path).await?;
    let engine = Arc::new(TradeEngine::new(store.clone(), ledger.clone(), Some(recorder)));

    let verifier: Arc<dyn TokenVerifier> = Arc::new(HttpTokenVerifier::new(&cfg.auth)?);
    let admin = Arc::new(AdminCredential::from_hex(&cfg.auth.admin_sha256)?);

    tokio::spawn(run_undo_worker(engine.clone()));

    let state = AppState {
        store,
        engine,
        ledger,
        verifier,
        admin,
        data_dir: cfg.data.dir.clone(),
    };
    let app = router(state);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(target: "http", %addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
