use std::collections::HashMap;

use axum::extract::{Form, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::auth::{AuthError, UserInfo};
use crate::markets::{back, MarketId};
use crate::storage::seed::seed_store;
use crate::trading::{ConfirmParams, FormError, PurchaseForm, PurchaseParams};

use super::error::ApiError;
use super::AppState;

/// Upper bound on ids accepted by the bulk query endpoints.
const MAX_BULK_MARKETS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub market: Option<String>,
    pub markets: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePortfolioParams {
    pub name: Option<String>,
    pub public: Option<String>,
    pub description: Option<String>,
}

async fn require_user(
    state: &AppState,
    headers: &HeaderMap,
    route: &'static str,
) -> Result<UserInfo, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingHeader);

    let user = match token {
        Ok(token) => state.verifier.verify(token).await,
        Err(err) => Err(err),
    };

    match user {
        Ok(user) => Ok(user),
        Err(err) => {
            tracing::info!(target: "http", route, user = "unknown", %err, "auth failed");
            Err(err.into())
        }
    }
}

fn require_admin(state: &AppState, headers: &HeaderMap, route: &'static str) -> Result<(), ApiError> {
    let header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    state.admin.verify(header).map_err(|err| {
        tracing::info!(target: "http", route, user = "admin", %err, "auth failed");
        ApiError::from(err)
    })
}

/// Split a comma-separated market list, enforcing the bulk cap. Ids that
/// fail to parse surface as `null` entries rather than failing the batch.
fn split_markets(raw: &str) -> Result<Vec<(String, Option<MarketId>)>, ApiError> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() > MAX_BULK_MARKETS {
        return Err(ApiError::bad_request(format!(
            "at most {MAX_BULK_MARKETS} markets may be queried at once"
        )));
    }
    Ok(parts
        .into_iter()
        .map(|part| (part.to_string(), MarketId::parse(part).ok()))
        .collect())
}

fn known_ids(entries: &[(String, Option<MarketId>)]) -> Vec<MarketId> {
    entries.iter().filter_map(|(_, id)| id.clone()).collect()
}

/// GET `/current_holdings?market=<id>` or `?markets=<csv>`.
pub async fn current_holdings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MarketsQuery>,
) -> Result<Response, ApiError> {
    let user = require_user(&state, &headers, "current_holdings").await?;

    if let Some(raw) = query.market {
        let id = MarketId::parse(&raw)?;
        let snapshot = state
            .store
            .snapshot(&id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("the market {id} cannot be found")))?;
        tracing::info!(target: "http", route = "current_holdings", uid = %user.uid, market = %id, "ok");
        return Ok(Json(snapshot).into_response());
    }

    let raw = query.markets.ok_or(FormError::MissingField("market"))?;
    let entries = split_markets(&raw)?;
    let snapshots = state.store.snapshots(&known_ids(&entries)).await?;

    let mut body = Map::new();
    let mut found = snapshots.into_iter();
    for (raw_id, parsed) in entries {
        let value = match parsed {
            Some(_) => serde_json::to_value(found.next().flatten())?,
            None => Value::Null,
        };
        body.insert(raw_id, value);
    }
    tracing::info!(target: "http", route = "current_holdings", uid = %user.uid, "ok");
    Ok(Json(Value::Object(body)).into_response())
}

/// GET `/historical_holdings?market=<id>` or `?markets=<csv>`. Responses
/// carry the time log; `b` series are truncated to its lengths.
pub async fn historical_holdings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MarketsQuery>,
) -> Result<Response, ApiError> {
    let user = require_user(&state, &headers, "historical_holdings").await?;
    let time = state.store.time_log().await?;

    if let Some(raw) = query.market {
        let id = MarketId::parse(&raw)?;
        let mut hist = state
            .store
            .hist(&id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("the market {id} cannot be found")))?;
        hist.truncate_b_to(&time);
        tracing::info!(target: "http", route = "historical_holdings", uid = %user.uid, market = %id, "ok");
        return Ok(Json(json!({"data": hist, "time": time})).into_response());
    }

    let raw = query.markets.ok_or(FormError::MissingField("market"))?;
    let entries = split_markets(&raw)?;
    let hists = state.store.hists(&known_ids(&entries)).await?;

    let mut data = Map::new();
    let mut found = hists.into_iter();
    for (raw_id, parsed) in entries {
        let value = match parsed {
            Some(_) => match found.next().flatten() {
                Some(mut hist) => {
                    hist.truncate_b_to(&time);
                    serde_json::to_value(hist)?
                }
                None => Value::Null,
            },
            None => Value::Null,
        };
        data.insert(raw_id, value);
    }
    tracing::info!(target: "http", route = "historical_holdings", uid = %user.uid, "ok");
    Ok(Json(json!({"data": data, "time": time})).into_response())
}

/// GET `/current_back_prices?markets=<csv>`.
pub async fn current_back_prices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MarketsQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, &headers, "current_back_prices").await?;
    let raw = query.markets.ok_or(FormError::MissingField("markets"))?;
    let entries = split_markets(&raw)?;
    let snapshots = state.store.snapshots(&known_ids(&entries)).await?;

    let mut body = Map::new();
    let mut found = snapshots.into_iter();
    for (raw_id, parsed) in entries {
        let price = match parsed {
            Some(_) => found.next().flatten().as_ref().and_then(back::current_back_price),
            None => None,
        };
        body.insert(raw_id, serde_json::to_value(price)?);
    }
    tracing::info!(target: "http", route = "current_back_prices", uid = %user.uid, markets = %raw, "ok");
    Ok(Json(Value::Object(body)))
}

/// GET `/daily_back_prices?markets=<csv>`.
pub async fn daily_back_prices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MarketsQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, &headers, "daily_back_prices").await?;
    let raw = query.markets.ok_or(FormError::MissingField("markets"))?;
    let entries = split_markets(&raw)?;
    let hists = state.store.hists(&known_ids(&entries)).await?;

    let mut body = Map::new();
    let mut found = hists.into_iter();
    for (raw_id, parsed) in entries {
        let prices = match parsed {
            Some(_) => found.next().flatten().as_ref().and_then(back::daily_back_prices),
            None => None,
        };
        body.insert(raw_id, serde_json::to_value(prices)?);
    }
    tracing::info!(target: "http", route = "daily_back_prices", uid = %user.uid, markets = %raw, "ok");
    Ok(Json(Value::Object(body)))
}

/// POST `/purchase`.
pub async fn purchase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<PurchaseParams>,
) -> Result<Response, ApiError> {
    let user = require_user(&state, &headers, "purchase").await?;
    let form = PurchaseForm::from_params(&user.uid, params)?;
    state.ledger.check_owner(&form.portfolio_id, &user.uid).await?;

    let outcome = state.engine.attempt_purchase(&user, &form).await.map_err(|err| {
        tracing::info!(target: "http", route = "purchase", uid = %user.uid, market = %form.market, %err, "fail");
        ApiError::from(err)
    })?;

    tracing::info!(
        target: "http",
        route = "purchase",
        uid = %user.uid,
        market = %form.market,
        success = outcome.success,
        price = outcome.price,
        "ok"
    );
    Ok(Json(outcome).into_response())
}

/// POST `/confirm_order`.
pub async fn confirm_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<ConfirmParams>,
) -> Result<Response, ApiError> {
    let user = require_user(&state, &headers, "confirm_order").await?;
    let cancel_id = params.cancel_id.ok_or(FormError::MissingField("cancelId"))?;
    let raw_confirm = params.confirm.ok_or(FormError::MissingField("confirm"))?;
    let confirm: bool = serde_json::from_str(&raw_confirm)
        .map_err(|_| FormError::Malformed(format!("confirm ({raw_confirm}) must be true or false")))?;

    let status = state.engine.confirm_order(&user, &cancel_id, confirm).await.map_err(|err| {
        tracing::info!(target: "http", route = "confirm_order", uid = %user.uid, cancel_id = %cancel_id, %err, "fail");
        ApiError::from(err)
    })?;

    tracing::info!(target: "http", route = "confirm_order", uid = %user.uid, cancel_id = %cancel_id, status, "ok");
    Ok(status.into_response())
}

/// POST `/create_portfolio`.
pub async fn create_portfolio(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<CreatePortfolioParams>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, &headers, "create_portfolio").await?;
    let name = params.name.ok_or(FormError::MissingField("name"))?;
    let raw_public = params.public.ok_or(FormError::MissingField("public"))?;
    let public: bool = serde_json::from_str(&raw_public)
        .map_err(|_| FormError::Malformed(format!("public ({raw_public}) must be true or false")))?;
    let description = params.description.unwrap_or_default();

    let portfolio_id = state.ledger.create_portfolio(&user, &name, public, &description).await?;
    tracing::info!(target: "http", route = "create_portfolio", uid = %user.uid, portfolio_id = %portfolio_id, "ok");
    Ok(Json(json!({"success": true, "portfolioId": portfolio_id})))
}

/// GET `/init_redis` (admin): reseed market state from the data directory.
pub async fn init_redis(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<String, ApiError> {
    require_admin(&state, &headers, "init_redis")?;
    let markets = seed_store(&state.store, &state.data_dir).await?;
    tracing::info!(target: "http", route = "init_redis", user = "admin", markets, "ok");
    Ok("Initialised Redis".to_string())
}

/// POST `/update_b` (admin): apply `<market>=<b>` pairs through the
/// optimistic update loop so concurrent trades are not clobbered.
pub async fn update_b(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(pairs): Form<HashMap<String, String>>,
) -> Result<String, ApiError> {
    require_admin(&state, &headers, "update_b")?;

    let mut last = None;
    for (raw_market, raw_b) in &pairs {
        let id = MarketId::parse(raw_market)?;
        let b: f64 = raw_b
            .parse()
            .map_err(|_| ApiError::bad_request(format!("b ({raw_b}) is not a number")))?;
        if !b.is_finite() || b <= 0.0 {
            return Err(ApiError::bad_request(format!(
                "liquidity parameter must be positive, got {b}"
            )));
        }
        state.store.watch_update(&id, 100, |current| Ok(current.with_b(b))).await?;
        tracing::info!(target: "http", route = "update_b", market = %id, b, "ok");
        last = Some((raw_market.clone(), b));
    }

    match last {
        Some((market, b)) => Ok(format!("set {market} b to {b}")),
        None => Ok("no markets supplied".to_string()),
    }
}
