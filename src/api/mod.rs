//! HTTP surface.
//!
//! Read views join the store with the live cache to produce mark-to-market
//! numbers; the only writes are the manual agent-cycle trigger and the
//! snapshot endpoint. Store failures on read endpoints degrade to empty
//! result sets rather than erroring, matching a read-only operational tool.
//! CORS is permissive on every route.

use crate::analytics::{sharpe_and_drawdown, PerfStats};
use crate::cache::RateCache;
use crate::error::DeskError;
use crate::paper::mark_to_market;
use crate::sampler::{ai_valuation, Sampler};
use crate::store::{HistoryQuery, Store};
use crate::types::{
    AiDecision, AiPosition, AiTrader, EquitySnapshot, FundingSpread, OwnerKind, Portfolio,
    Position, Transaction, Venue, AI_BASELINE_USD,
};
use crate::ai::AiEngine;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_SPREAD_LIMIT: usize = 20;
const MAX_SPREAD_LIMIT: usize = 100;
const DEFAULT_SNAPSHOT_DAYS: u32 = 7;
const MAX_SNAPSHOT_DAYS: u32 = 90;
const CLOSED_POSITIONS_SHOWN: usize = 20;
const TRANSACTIONS_SHOWN: usize = 50;
const DECISIONS_SHOWN: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<RateCache>,
    pub store: Arc<Store>,
    pub ai: Arc<AiEngine>,
    pub sampler: Arc<Sampler>,
}

impl IntoResponse for DeskError {
    fn into_response(self) -> Response {
        let status = match &self {
            DeskError::NotFound(_) => StatusCode::NOT_FOUND,
            DeskError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, DeskError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/funding", get(funding))
        .route("/api/funding/history", get(funding_history))
        .route("/api/funding/:asset", get(funding_asset))
        .route("/api/paper/portfolios", get(portfolios))
        .route("/api/paper/leaderboard", get(leaderboard))
        .route("/api/paper/portfolios/:id", get(portfolio_detail))
        .route("/api/paper/snapshots", get(paper_snapshots))
        .route("/api/ai/traders", get(traders))
        .route("/api/ai/traders/:name", get(trader_detail))
        .route("/api/ai/snapshots", get(ai_snapshots))
        .route("/api/ai/run/:name", post(run_agent))
        .route("/api/internal/snapshot", post(run_sampler))
        .layer(middleware::from_fn(permissive_cors))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> crate::error::Result<()> {
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "http server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| DeskError::Config(format!("bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| DeskError::Config(format!("server: {e}")))
}

async fn permissive_cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type, authorization"),
    );
    response
}

// -- Market data ------------------------------------------------------------

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "hldesk-api" }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "lastFetch": state.cache.last_fetch().await.map(|t| t.timestamp_millis()),
        "assetCount": state.cache.asset_count().await,
        "cacheAge": state.cache.age_ms().await,
    }))
}

#[derive(Deserialize)]
struct FundingParams {
    limit: Option<usize>,
}

async fn funding(
    State(state): State<AppState>,
    Query(params): Query<FundingParams>,
) -> Json<Vec<FundingSpread>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SPREAD_LIMIT)
        .clamp(1, MAX_SPREAD_LIMIT);
    let agg = state.cache.get().await;
    Json(agg.spreads.iter().take(limit).cloned().collect())
}

async fn funding_asset(
    State(state): State<AppState>,
    Path(asset): Path<String>,
) -> ApiResult<FundingSpread> {
    let agg = state.cache.get().await;
    agg.spread_for(&asset.to_uppercase())
        .cloned()
        .map(Json)
        .ok_or_else(|| DeskError::NotFound(format!("asset {asset}")))
}

#[derive(Deserialize)]
struct HistoryParams {
    asset: Option<String>,
    venue: Option<String>,
    from: Option<i64>,
    to: Option<i64>,
}

async fn funding_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<crate::store::FundingSnapshotRow>> {
    let asset = params
        .asset
        .ok_or_else(|| DeskError::Validation("asset query param is required".to_string()))?;
    let venue = params
        .venue
        .map(|v| Venue::from_str(&v).map_err(DeskError::Validation))
        .transpose()?;

    let query = HistoryQuery {
        asset: Some(asset),
        venue,
        from: params.from.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        to: params.to.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
    };
    Ok(Json(state.store.funding_history(&query).await?))
}

// -- Paper portfolios -------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioView {
    #[serde(flatten)]
    portfolio: Portfolio,
    total_value: Decimal,
    unrealized_pnl: Decimal,
    funding_collected: Decimal,
    open_positions: u32,
    pnl: Decimal,
    pnl_pct: Decimal,
}

async fn portfolio_view(state: &AppState, portfolio: Portfolio) -> PortfolioView {
    let agg = state.cache.get().await;
    let positions = state
        .store
        .open_positions(&portfolio.id)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "open positions read failed");
            Vec::new()
        });
    let valuation = mark_to_market(&positions, &agg);
    let total_value = valuation.total_value(portfolio.cash_balance);
    let pnl = total_value - portfolio.initial_balance;
    let pnl_pct = if portfolio.initial_balance.is_zero() {
        Decimal::ZERO
    } else {
        pnl / portfolio.initial_balance * Decimal::ONE_HUNDRED
    };

    PortfolioView {
        total_value,
        unrealized_pnl: valuation.unrealized_pnl,
        funding_collected: valuation.funding_collected,
        open_positions: valuation.open_positions,
        pnl,
        pnl_pct,
        portfolio,
    }
}

async fn portfolios(State(state): State<AppState>) -> Json<Vec<PortfolioView>> {
    let rows = state.store.all_portfolios().await.unwrap_or_else(|e| {
        warn!(error = %e, "portfolio read failed");
        Vec::new()
    });
    let mut views = Vec::with_capacity(rows.len());
    for portfolio in rows {
        views.push(portfolio_view(&state, portfolio).await);
    }
    Json(views)
}

async fn leaderboard(State(state): State<AppState>) -> Json<Vec<PortfolioView>> {
    let Json(mut views) = portfolios(State(state)).await;
    views.sort_by(|a, b| b.pnl_pct.cmp(&a.pnl_pct));
    Json(views)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioDetail {
    #[serde(flatten)]
    view: PortfolioView,
    positions: Vec<Position>,
    closed_positions: Vec<Position>,
    transactions: Vec<Transaction>,
}

async fn portfolio_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PortfolioDetail> {
    let portfolio = state
        .store
        .portfolio(&id)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("portfolio {id}")))?;

    let positions = state.store.open_positions(&id).await.unwrap_or_default();
    let closed = state
        .store
        .closed_positions(&id, CLOSED_POSITIONS_SHOWN)
        .await
        .unwrap_or_default();
    let transactions = state
        .store
        .transactions(&id, TRANSACTIONS_SHOWN)
        .await
        .unwrap_or_default();

    Ok(Json(PortfolioDetail {
        view: portfolio_view(&state, portfolio).await,
        positions,
        closed_positions: closed,
        transactions,
    }))
}

#[derive(Deserialize)]
struct SnapshotParams {
    days: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OwnerSeries {
    owner_id: String,
    series: Vec<EquitySnapshot>,
    stats: PerfStats,
}

async fn snapshot_series(
    state: &AppState,
    kind: OwnerKind,
    days: Option<u32>,
) -> Vec<OwnerSeries> {
    let days = days.unwrap_or(DEFAULT_SNAPSHOT_DAYS).clamp(1, MAX_SNAPSHOT_DAYS);
    let rows = state.store.snapshots(kind, days).await.unwrap_or_else(|e| {
        warn!(error = %e, "snapshot read failed");
        Vec::new()
    });

    let mut grouped: BTreeMap<String, Vec<EquitySnapshot>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.owner_id.clone()).or_default().push(row);
    }

    grouped
        .into_iter()
        .map(|(owner_id, series)| {
            let values: Vec<Decimal> = series.iter().map(|s| s.total_value).collect();
            OwnerSeries {
                owner_id,
                stats: sharpe_and_drawdown(&values),
                series,
            }
        })
        .collect()
}

async fn paper_snapshots(
    State(state): State<AppState>,
    Query(params): Query<SnapshotParams>,
) -> Json<Vec<OwnerSeries>> {
    Json(snapshot_series(&state, OwnerKind::Portfolio, params.days).await)
}

async fn ai_snapshots(
    State(state): State<AppState>,
    Query(params): Query<SnapshotParams>,
) -> Json<Vec<OwnerSeries>> {
    Json(snapshot_series(&state, OwnerKind::Agent, params.days).await)
}

// -- AI traders -------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraderView {
    #[serde(flatten)]
    trader: AiTrader,
    total_value: Decimal,
    unrealized_pnl: Decimal,
    funding_collected: Decimal,
    open_positions: u32,
    pnl: Decimal,
    pnl_pct: Decimal,
    last_decision: Option<AiDecision>,
}

async fn trader_view(state: &AppState, trader: AiTrader) -> TraderView {
    let agg = state.cache.get().await;
    let positions = state
        .store
        .ai_open_positions(&trader.id)
        .await
        .unwrap_or_default();
    let (unrealized, funding, notional) = ai_valuation(&positions, &agg);
    let total_value = trader.cash_balance + notional + unrealized;
    let pnl = total_value - AI_BASELINE_USD;
    let pnl_pct = pnl / AI_BASELINE_USD * Decimal::ONE_HUNDRED;
    let last_decision = state.store.last_decision(&trader.id).await.unwrap_or(None);

    TraderView {
        total_value,
        unrealized_pnl: unrealized,
        funding_collected: funding,
        open_positions: positions.len() as u32,
        pnl,
        pnl_pct,
        last_decision,
        trader,
    }
}

async fn traders(State(state): State<AppState>) -> Json<Vec<TraderView>> {
    let rows = state.store.all_traders().await.unwrap_or_else(|e| {
        warn!(error = %e, "trader read failed");
        Vec::new()
    });
    let mut views = Vec::with_capacity(rows.len());
    for trader in rows {
        views.push(trader_view(&state, trader).await);
    }
    views.sort_by(|a, b| b.pnl_pct.cmp(&a.pnl_pct));
    Json(views)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraderDetail {
    #[serde(flatten)]
    view: TraderView,
    positions: Vec<AiPosition>,
    decisions: Vec<AiDecision>,
}

async fn trader_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<TraderDetail> {
    let trader = state
        .store
        .trader_by_name(&name)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("agent {name}")))?;

    let positions = state
        .store
        .ai_open_positions(&trader.id)
        .await
        .unwrap_or_default();
    let decisions = state
        .store
        .decisions(&trader.id, DECISIONS_SHOWN)
        .await
        .unwrap_or_default();

    Ok(Json(TraderDetail {
        view: trader_view(&state, trader).await,
        positions,
        decisions,
    }))
}

async fn run_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<AiDecision> {
    Ok(Json(state.ai.run_agent_cycle(&name).await?))
}

async fn run_sampler(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let snapshotted = state.sampler.snapshot_all().await?;
    Ok(Json(json!({ "ok": true, "snapshotted": snapshotted })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_limit_clamps_into_range() {
        assert_eq!(500usize.clamp(1, MAX_SPREAD_LIMIT), 100);
        assert_eq!(0usize.clamp(1, MAX_SPREAD_LIMIT), 1);
        let unset: Option<usize> = None;
        assert_eq!(
            unset.unwrap_or(DEFAULT_SPREAD_LIMIT).clamp(1, MAX_SPREAD_LIMIT),
            20
        );
    }

    #[test]
    fn snapshot_days_clamp_into_range() {
        assert_eq!(365u32.clamp(1, MAX_SNAPSHOT_DAYS), 90);
        assert_eq!(0u32.clamp(1, MAX_SNAPSHOT_DAYS), 1);
    }

    #[test]
    fn error_statuses_map_to_http() {
        let not_found = DeskError::NotFound("asset X".to_string()).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let bad = DeskError::Validation("asset required".to_string()).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let store = DeskError::Store("boom".to_string()).into_response();
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
