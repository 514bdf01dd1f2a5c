//! Canonical market data and simulation records.
//!
//! Market-facing types (`FundingRate`, `FundingSpread`, `AggregatedResult`)
//! serialize camelCase with millisecond timestamps — they travel through the
//! HTTP surface unchanged. Simulation rows map 1:1 onto store tables and keep
//! snake_case column names.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Flat taker/maker fee applied to every simulated open and close.
pub const FEE_RATE: Decimal = rust_decimal_macros::dec!(0.0005);

/// Starting bankroll for AI traders, used as the P&L baseline.
pub const AI_BASELINE_USD: Decimal = rust_decimal_macros::dec!(10000);

/// Supported venues. Hyperliquid is the primary; the others form the CEX set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Hyperliquid,
    Binance,
    Bybit,
    Okx,
}

impl Venue {
    /// The configured CEX set, in lookup order.
    pub const CEX: [Venue; 3] = [Venue::Binance, Venue::Bybit, Venue::Okx];

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Hyperliquid => "hyperliquid",
            Venue::Binance => "binance",
            Venue::Bybit => "bybit",
            Venue::Okx => "okx",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hyperliquid" => Ok(Venue::Hyperliquid),
            "binance" => Ok(Venue::Binance),
            "bybit" => Ok(Venue::Bybit),
            "okx" => Ok(Venue::Okx),
            other => Err(format!("unknown venue: {other}")),
        }
    }
}

/// One funding observation: a single asset on a single venue at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    /// Canonical upper-case ticker, venue suffixes stripped.
    pub asset: String,
    pub venue: Venue,
    /// Rate normalized to an 8-hour equivalent, as a decimal fraction.
    pub rate_8h: Decimal,
    /// The native rate exactly as the venue returned it.
    pub rate_raw: Decimal,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_funding_time: Option<DateTime<Utc>>,
    /// Open interest in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<Decimal>,
    /// 24-hour price change, percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<Decimal>,
    /// 24-hour notional volume in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<Decimal>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub observed_at: DateTime<Utc>,
}

/// Cross-venue funding view for one asset present on the primary venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingSpread {
    pub asset: String,
    /// The Hyperliquid observation; spreads only exist for primary assets.
    pub primary: FundingRate,
    /// Matching CEX observations, keyed by venue.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cex: BTreeMap<Venue, FundingRate>,
    /// CEX venue whose 8h rate has the largest absolute value, `"none"` when
    /// no CEX listed the asset.
    #[serde(with = "best_cex_serde")]
    pub best_cex: Option<Venue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_cex_rate: Option<Decimal>,
    /// `primary.rate8h - bestCex.rate8h`, or zero without CEX data.
    pub max_spread: Decimal,
}

/// `bestCex` renders as the venue name or the literal string `"none"`.
mod best_cex_serde {
    use super::Venue;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(v: &Option<Venue>, ser: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(venue) => ser.serialize_str(venue.as_str()),
            None => ser.serialize_str("none"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Venue>, D::Error> {
        let raw = String::deserialize(de)?;
        if raw == "none" {
            return Ok(None);
        }
        Venue::from_str(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// Output of one aggregation pass over every venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    /// Sorted by `|maxSpread|` descending.
    pub spreads: Vec<FundingSpread>,
    pub all_rates: Vec<FundingRate>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl AggregatedResult {
    pub fn empty() -> Self {
        Self {
            spreads: Vec::new(),
            all_rates: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn spread_for(&self, asset: &str) -> Option<&FundingSpread> {
        self.spreads.iter().find(|s| s.asset == asset)
    }
}

// ---------------------------------------------------------------------------
// Simulation rows
// ---------------------------------------------------------------------------

/// A paper-trading portfolio driven by one named strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub strategy_name: String,
    /// Opaque per-portfolio tuning; recognized keys are parsed by the engine.
    #[serde(default)]
    pub strategy_config: serde_json::Value,
    pub cash_balance: Decimal,
    pub initial_balance: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Which side of the funding flow a paper position sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    /// Short the perp, collect positive funding.
    ShortPerp,
    /// Long the perp, collect negative funding.
    LongPerp,
}

impl PositionSide {
    /// Funding and price-return sign: +1 for shorts, -1 for longs.
    pub fn sign(&self) -> Decimal {
        match self {
            PositionSide::ShortPerp => Decimal::ONE,
            PositionSide::LongPerp => -Decimal::ONE,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::ShortPerp => f.write_str("short_perp"),
            PositionSide::LongPerp => f.write_str("long_perp"),
        }
    }
}

/// An open or closed paper position. Notional is immutable once opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub portfolio_id: String,
    pub asset: String,
    pub side: PositionSide,
    pub size_usd: Decimal,
    pub entry_rate_8h: Decimal,
    pub entry_spread: Decimal,
    /// Mark price at open.
    pub entry_price: Decimal,
    /// Signed cumulative funding credited to this position.
    pub total_funding_collected: Decimal,
    pub last_funding_at: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub is_open: bool,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    pub fees_paid: Decimal,
}

impl Position {
    /// Signed mark-to-market price P&L at `mark`, excluding funding and fees.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.side.sign() * (self.entry_price - mark) / self.entry_price * self.size_usd
    }
}

/// Append-only cash-flow audit entry. Cash-in positive, cash-out negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub portfolio_id: String,
    #[serde(default)]
    pub position_id: Option<String>,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub asset: String,
    pub amount: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Open,
    Close,
    Fee,
    Funding,
}

/// Periodic equity observation for a portfolio or an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub owner_id: String,
    pub owner_kind: OwnerKind,
    pub snapshot_at: DateTime<Utc>,
    pub total_value: Decimal,
    pub cash_balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub funding_collected: Decimal,
    pub open_positions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Portfolio,
    Agent,
}

// ---------------------------------------------------------------------------
// AI traders
// ---------------------------------------------------------------------------

/// An LLM-driven trading agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTrader {
    pub id: String,
    pub name: String,
    /// OpenRouter model identifier.
    pub model: String,
    pub emoji: String,
    pub persona: String,
    pub cash_balance: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    /// Funding sign mirrors the paper engine: shorts collect positive rates.
    pub fn funding_sign(&self) -> Decimal {
        match self {
            TradeDirection::Short => Decimal::ONE,
            TradeDirection::Long => -Decimal::ONE,
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDirection::Long => f.write_str("long"),
            TradeDirection::Short => f.write_str("short"),
        }
    }
}

/// An agent's open or closed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiPosition {
    pub id: String,
    pub trader_id: String,
    pub asset: String,
    pub direction: TradeDirection,
    pub size_usd: Decimal,
    pub entry_price: Decimal,
    pub entry_rate_8h: Decimal,
    pub funding_collected: Decimal,
    pub last_funding_at: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub is_open: bool,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl AiPosition {
    /// Signed mark-to-market price P&L at `mark`.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let pct = match self.direction {
            TradeDirection::Long => (mark - self.entry_price) / self.entry_price,
            TradeDirection::Short => (self.entry_price - mark) / self.entry_price,
        };
        pct * self.size_usd
    }
}

/// One action per agent cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    OpenLong,
    OpenShort,
    Close,
    Hold,
}

impl FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open_long" => Ok(TradeAction::OpenLong),
            "open_short" => Ok(TradeAction::OpenShort),
            "close" => Ok(TradeAction::Close),
            "hold" => Ok(TradeAction::Hold),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Persisted record of what an agent decided and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiDecision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub trader_id: String,
    pub action: TradeAction,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub size_usd: Option<Decimal>,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

impl AiDecision {
    pub fn hold(trader_id: &str, reasoning: impl Into<String>) -> Self {
        Self {
            id: None,
            trader_id: trader_id.to_string(),
            action: TradeAction::Hold,
            asset: None,
            size_usd: None,
            reasoning: reasoning.into(),
            created_at: Utc::now(),
        }
    }
}
