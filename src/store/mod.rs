//! Supabase-backed persistence.
//!
//! A thin typed client over the PostgREST interface. Without credentials the
//! store runs disabled: writes become no-ops and reads come back empty, so
//! the market pipeline keeps serving from memory. With only an anon key,
//! reads work and writes are rejected upstream — same degraded behavior.
//!
//! Rate batches are appended in chunks to stay inside PostgREST payload
//! limits; there is no deduplication at this layer.

use crate::config::SupabaseConfig;
use crate::error::{DeskError, Result};
use crate::types::{
    AiDecision, AiPosition, AiTrader, EquitySnapshot, FundingRate, OwnerKind, Portfolio, Position,
    Transaction, Venue,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

const SNAPSHOT_CHUNK: usize = 500;
const HISTORY_LIMIT: usize = 1000;

const T_FUNDING: &str = "funding_snapshots";
const T_PORTFOLIOS: &str = "paper_portfolios";
const T_POSITIONS: &str = "paper_positions";
const T_TRANSACTIONS: &str = "paper_transactions";
const T_PAPER_SNAPSHOTS: &str = "paper_snapshots";
const T_TRADERS: &str = "ai_traders";
const T_AI_POSITIONS: &str = "ai_positions";
const T_DECISIONS: &str = "ai_decisions";
const T_AI_SNAPSHOTS: &str = "ai_snapshots";

/// One persisted funding observation, column-for-column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSnapshotRow {
    pub asset: String,
    pub venue: Venue,
    pub rate_8h: Decimal,
    pub rate_raw: Decimal,
    #[serde(default)]
    pub next_funding_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub open_interest: Option<Decimal>,
    #[serde(default)]
    pub mark_price: Option<Decimal>,
    #[serde(default)]
    pub change_24h: Option<Decimal>,
    #[serde(default)]
    pub volume_24h: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

impl From<&FundingRate> for FundingSnapshotRow {
    fn from(rate: &FundingRate) -> Self {
        Self {
            asset: rate.asset.clone(),
            venue: rate.venue,
            rate_8h: rate.rate_8h,
            rate_raw: rate.rate_raw,
            next_funding_time: rate.next_funding_time,
            open_interest: rate.open_interest,
            mark_price: rate.mark_price,
            change_24h: rate.change_24h,
            volume_24h: rate.volume_24h,
            observed_at: rate.observed_at,
        }
    }
}

/// Filters for the raw funding history read.
#[derive(Debug, Default, Clone)]
pub struct HistoryQuery {
    pub asset: Option<String>,
    pub venue: Option<Venue>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    key: String,
    writes_enabled: bool,
}

pub struct Store {
    inner: Option<Inner>,
}

impl Store {
    pub fn from_config(config: Option<&SupabaseConfig>) -> Self {
        let Some(config) = config else {
            warn!("supabase not configured; persistence disabled");
            return Self::disabled();
        };

        let key = config
            .service_role_key
            .clone()
            .or_else(|| config.anon_key.clone());
        let Some(key) = key else {
            warn!("supabase url set but no key; persistence disabled");
            return Self::disabled();
        };

        let writes_enabled = config.service_role_key.is_some();
        if !writes_enabled {
            warn!("supabase anon key only; store is read-only");
        }

        Self {
            inner: Some(Inner {
                http: reqwest::Client::new(),
                base_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
                key,
                writes_enabled,
            }),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    // -- PostgREST plumbing -------------------------------------------------

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let Some(inner) = &self.inner else {
            return Ok(Vec::new());
        };

        let resp = inner
            .http
            .get(format!("{}/{}", inner.base_url, table))
            .header("apikey", &inner.key)
            .bearer_auth(&inner.key)
            .query(query)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DeskError::Store(format!("{table} select: {status} {body}")));
        }

        Ok(resp.json().await?)
    }

    /// Returns how many rows actually landed: zero when the store is
    /// disabled or read-only.
    async fn insert<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<usize> {
        let Some(inner) = &self.inner else {
            return Ok(0);
        };
        if !inner.writes_enabled {
            debug!(table, "store read-only, insert skipped");
            return Ok(0);
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let resp = inner
            .http
            .post(format!("{}/{}", inner.base_url, table))
            .header("apikey", &inner.key)
            .bearer_auth(&inner.key)
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DeskError::Store(format!("{table} insert: {status} {body}")));
        }
        Ok(rows.len())
    }

    async fn update_by_id(&self, table: &str, id: &str, patch: &Value) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        if !inner.writes_enabled {
            debug!(table, "store read-only, update skipped");
            return Ok(());
        }

        let resp = inner
            .http
            .patch(format!("{}/{}", inner.base_url, table))
            .header("apikey", &inner.key)
            .bearer_auth(&inner.key)
            .header("Prefer", "return=minimal")
            .query(&[("id", format!("eq.{id}"))])
            .json(patch)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DeskError::Store(format!("{table} update: {status} {body}")));
        }
        Ok(())
    }

    // -- Funding rates ------------------------------------------------------

    /// Append a polled rate batch, chunked to keep request bodies bounded.
    /// Returns the number of rows actually written.
    pub async fn save_rates(&self, rates: &[FundingRate]) -> Result<usize> {
        let rows: Vec<FundingSnapshotRow> = rates.iter().map(FundingSnapshotRow::from).collect();
        let mut written = 0;
        for chunk in rows.chunks(SNAPSHOT_CHUNK) {
            written += self.insert(T_FUNDING, chunk).await?;
        }
        Ok(written)
    }

    pub async fn funding_history(&self, query: &HistoryQuery) -> Result<Vec<FundingSnapshotRow>> {
        let mut params = vec![
            ("select", "*".to_string()),
            ("order", "observed_at.desc".to_string()),
            ("limit", HISTORY_LIMIT.to_string()),
        ];
        if let Some(asset) = &query.asset {
            params.push(("asset", format!("eq.{}", asset.to_uppercase())));
        }
        if let Some(venue) = query.venue {
            params.push(("venue", format!("eq.{venue}")));
        }
        if let Some(from) = query.from {
            params.push(("observed_at", format!("gte.{}", from.to_rfc3339())));
        }
        if let Some(to) = query.to {
            params.push(("observed_at", format!("lte.{}", to.to_rfc3339())));
        }
        self.select(T_FUNDING, &params).await
    }

    // -- Paper portfolios ---------------------------------------------------

    pub async fn active_portfolios(&self) -> Result<Vec<Portfolio>> {
        self.select(
            T_PORTFOLIOS,
            &[
                ("select", "*".to_string()),
                ("is_active", "eq.true".to_string()),
            ],
        )
        .await
    }

    pub async fn all_portfolios(&self) -> Result<Vec<Portfolio>> {
        self.select(T_PORTFOLIOS, &[("select", "*".to_string())])
            .await
    }

    pub async fn portfolio(&self, id: &str) -> Result<Option<Portfolio>> {
        let rows: Vec<Portfolio> = self
            .select(
                T_PORTFOLIOS,
                &[("select", "*".to_string()), ("id", format!("eq.{id}"))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn update_portfolio_cash(&self, id: &str, cash: Decimal) -> Result<()> {
        self.update_by_id(T_PORTFOLIOS, id, &json!({ "cash_balance": cash }))
            .await
    }

    pub async fn open_positions(&self, portfolio_id: &str) -> Result<Vec<Position>> {
        self.select(
            T_POSITIONS,
            &[
                ("select", "*".to_string()),
                ("portfolio_id", format!("eq.{portfolio_id}")),
                ("is_open", "eq.true".to_string()),
            ],
        )
        .await
    }

    pub async fn closed_positions(&self, portfolio_id: &str, limit: usize) -> Result<Vec<Position>> {
        self.select(
            T_POSITIONS,
            &[
                ("select", "*".to_string()),
                ("portfolio_id", format!("eq.{portfolio_id}")),
                ("is_open", "eq.false".to_string()),
                ("order", "closed_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    pub async fn insert_position(&self, position: &Position) -> Result<()> {
        self.insert(T_POSITIONS, std::slice::from_ref(position))
            .await
            .map(|_| ())
    }

    pub async fn update_position_funding(
        &self,
        id: &str,
        total_funding: Decimal,
        last_funding_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_by_id(
            T_POSITIONS,
            id,
            &json!({
                "total_funding_collected": total_funding,
                "last_funding_at": last_funding_at.to_rfc3339(),
            }),
        )
        .await
    }

    pub async fn close_position(
        &self,
        id: &str,
        exit_price: Decimal,
        realized_pnl: Decimal,
        fees_paid: Decimal,
        closed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_by_id(
            T_POSITIONS,
            id,
            &json!({
                "is_open": false,
                "exit_price": exit_price,
                "realized_pnl": realized_pnl,
                "fees_paid": fees_paid,
                "closed_at": closed_at.to_rfc3339(),
            }),
        )
        .await
    }

    pub async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        self.insert(T_TRANSACTIONS, std::slice::from_ref(tx))
            .await
            .map(|_| ())
    }

    pub async fn transactions(&self, portfolio_id: &str, limit: usize) -> Result<Vec<Transaction>> {
        self.select(
            T_TRANSACTIONS,
            &[
                ("select", "*".to_string()),
                ("portfolio_id", format!("eq.{portfolio_id}")),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    // -- Equity snapshots ---------------------------------------------------

    pub async fn insert_snapshots(&self, snapshots: &[EquitySnapshot]) -> Result<()> {
        let paper: Vec<&EquitySnapshot> = snapshots
            .iter()
            .filter(|s| s.owner_kind == OwnerKind::Portfolio)
            .collect();
        let agents: Vec<&EquitySnapshot> = snapshots
            .iter()
            .filter(|s| s.owner_kind == OwnerKind::Agent)
            .collect();

        self.insert(T_PAPER_SNAPSHOTS, &paper).await?;
        self.insert(T_AI_SNAPSHOTS, &agents).await.map(|_| ())
    }

    pub async fn snapshots(&self, kind: OwnerKind, days: u32) -> Result<Vec<EquitySnapshot>> {
        let table = match kind {
            OwnerKind::Portfolio => T_PAPER_SNAPSHOTS,
            OwnerKind::Agent => T_AI_SNAPSHOTS,
        };
        let since = Utc::now() - Duration::days(days as i64);
        self.select(
            table,
            &[
                ("select", "*".to_string()),
                ("snapshot_at", format!("gte.{}", since.to_rfc3339())),
                ("order", "snapshot_at.asc".to_string()),
            ],
        )
        .await
    }

    // -- AI traders ---------------------------------------------------------

    pub async fn active_traders(&self) -> Result<Vec<AiTrader>> {
        self.select(
            T_TRADERS,
            &[
                ("select", "*".to_string()),
                ("is_active", "eq.true".to_string()),
            ],
        )
        .await
    }

    pub async fn all_traders(&self) -> Result<Vec<AiTrader>> {
        self.select(T_TRADERS, &[("select", "*".to_string())]).await
    }

    pub async fn trader_by_name(&self, name: &str) -> Result<Option<AiTrader>> {
        let rows: Vec<AiTrader> = self
            .select(
                T_TRADERS,
                &[
                    ("select", "*".to_string()),
                    ("name", format!("eq.{name}")),
                    ("is_active", "eq.true".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn update_trader_cash(&self, id: &str, cash: Decimal) -> Result<()> {
        self.update_by_id(T_TRADERS, id, &json!({ "cash_balance": cash }))
            .await
    }

    pub async fn ai_open_positions(&self, trader_id: &str) -> Result<Vec<AiPosition>> {
        self.select(
            T_AI_POSITIONS,
            &[
                ("select", "*".to_string()),
                ("trader_id", format!("eq.{trader_id}")),
                ("is_open", "eq.true".to_string()),
            ],
        )
        .await
    }

    pub async fn insert_ai_position(&self, position: &AiPosition) -> Result<()> {
        self.insert(T_AI_POSITIONS, std::slice::from_ref(position))
            .await
            .map(|_| ())
    }

    pub async fn update_ai_position_funding(
        &self,
        id: &str,
        funding_collected: Decimal,
        last_funding_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_by_id(
            T_AI_POSITIONS,
            id,
            &json!({
                "funding_collected": funding_collected,
                "last_funding_at": last_funding_at.to_rfc3339(),
            }),
        )
        .await
    }

    pub async fn close_ai_position(
        &self,
        id: &str,
        exit_price: Decimal,
        realized_pnl: Decimal,
        closed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_by_id(
            T_AI_POSITIONS,
            id,
            &json!({
                "is_open": false,
                "exit_price": exit_price,
                "realized_pnl": realized_pnl,
                "closed_at": closed_at.to_rfc3339(),
            }),
        )
        .await
    }

    pub async fn insert_decision(&self, decision: &AiDecision) -> Result<()> {
        self.insert(T_DECISIONS, std::slice::from_ref(decision))
            .await
            .map(|_| ())
    }

    pub async fn decisions(&self, trader_id: &str, limit: usize) -> Result<Vec<AiDecision>> {
        self.select(
            T_DECISIONS,
            &[
                ("select", "*".to_string()),
                ("trader_id", format!("eq.{trader_id}")),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    pub async fn last_decision(&self, trader_id: &str) -> Result<Option<AiDecision>> {
        let rows = self.decisions(trader_id, 1).await?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn rate(asset: &str) -> FundingRate {
        FundingRate {
            asset: asset.to_string(),
            venue: Venue::Hyperliquid,
            rate_8h: dec!(0.0004),
            rate_raw: dec!(0.00005),
            next_funding_time: None,
            open_interest: None,
            mark_price: Some(dec!(100)),
            change_24h: None,
            volume_24h: None,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn disabled_store_reads_empty_and_swallows_writes() {
        let store = Store::disabled();
        assert!(!store.is_enabled());

        // the write is swallowed, so nothing counts as persisted
        let saved = store.save_rates(&[rate("BTC")]).await.unwrap();
        assert_eq!(saved, 0);

        let history = store.funding_history(&HistoryQuery::default()).await.unwrap();
        assert!(history.is_empty());

        assert!(store.active_portfolios().await.unwrap().is_empty());
        assert!(store.trader_by_name("atlas").await.unwrap().is_none());
    }

    #[test]
    fn snapshot_row_round_trips_rate_fields() {
        let original = rate("ETH");
        let row = FundingSnapshotRow::from(&original);
        let json = serde_json::to_string(&row).unwrap();
        let back: FundingSnapshotRow = serde_json::from_str(&json).unwrap();

        assert_eq!(back.rate_8h, original.rate_8h);
        assert_eq!(back.rate_raw, original.rate_raw);
        assert_eq!(back.next_funding_time, original.next_funding_time);
        assert_eq!(back.venue, original.venue);
    }

    #[test]
    fn rate_batches_chunk_at_500() {
        let rows: Vec<FundingSnapshotRow> =
            (0..1203).map(|i| FundingSnapshotRow::from(&rate(&format!("A{i}")))).collect();
        let chunks: Vec<usize> = rows.chunks(SNAPSHOT_CHUNK).map(|c| c.len()).collect();
        assert_eq!(chunks, vec![500, 500, 203]);
    }
}
