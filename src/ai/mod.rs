//! AI trader engine.
//!
//! One agent per cycle call: accrue funding and sweep the fixed stop-loss,
//! build the market/portfolio context, ask the agent's model for exactly one
//! action, validate it, and execute. Invalid or unaffordable actions are
//! downgraded to `hold` rather than erroring — the cycle always terminates in
//! exactly one persisted decision and at most one position mutation.

pub mod llm;
pub mod prompt;

pub use llm::{extract_json_object, LlmClient, LLM_TIMEOUT_SECS};

use crate::cache::RateCache;
use crate::error::{DeskError, Result};
use crate::paper::FundingAccrual;
use crate::store::Store;
use crate::types::{
    AggregatedResult, AiDecision, AiPosition, AiTrader, TradeAction, TradeDirection, FEE_RATE,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Fixed stop-loss for all agents.
pub const AI_STOP_LOSS_PCT: Decimal = dec!(0.15);

/// Agents hold at most this many concurrent positions.
const MAX_POSITIONS: usize = 3;

/// Requested size is capped to this fraction of total value.
const MAX_SIZE_FRACTION: Decimal = dec!(0.3);

const MIN_POSITION_USD: Decimal = dec!(100);

/// Whole-hour funding accrual, mirroring the paper engine's mechanics.
pub fn accrue_ai_funding(
    position: &AiPosition,
    rate_8h: Decimal,
    now: DateTime<Utc>,
) -> Option<FundingAccrual> {
    let hours = (now - position.last_funding_at).num_hours();
    if hours <= 0 {
        return None;
    }
    let hourly_rate = rate_8h / dec!(8);
    let earned =
        position.size_usd * hourly_rate * Decimal::from(hours) * position.direction.funding_sign();
    Some(FundingAccrual {
        hours,
        earned,
        last_funding_at: position.last_funding_at + Duration::hours(hours),
    })
}

/// Signed price move as a fraction of entry.
pub fn ai_price_return_pct(position: &AiPosition, mark: Decimal) -> Decimal {
    if position.entry_price.is_zero() {
        return Decimal::ZERO;
    }
    match position.direction {
        TradeDirection::Long => (mark - position.entry_price) / position.entry_price,
        TradeDirection::Short => (position.entry_price - mark) / position.entry_price,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiCloseOutcome {
    pub price_return: Decimal,
    pub exit_fee: Decimal,
    pub realized_pnl: Decimal,
    pub cash_credit: Decimal,
}

/// Close accounting: funding was credited to cash during accrual, so the
/// credit excludes it, while realized P&L nets both entry and exit fees.
pub fn compute_ai_close(position: &AiPosition, mark: Decimal) -> AiCloseOutcome {
    let price_return = ai_price_return_pct(position, mark) * position.size_usd;
    let entry_fee = position.size_usd * FEE_RATE;
    let exit_fee = position.size_usd * FEE_RATE;
    AiCloseOutcome {
        price_return,
        exit_fee,
        realized_pnl: price_return + position.funding_collected - entry_fee - exit_fee,
        cash_credit: position.size_usd + price_return - exit_fee,
    }
}

/// A validated model response before execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDecision {
    pub action: TradeAction,
    pub asset: Option<String>,
    pub size_usd: Option<Decimal>,
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    asset: Option<String>,
    #[serde(default)]
    size_usd: Option<serde_json::Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Extract and validate the first JSON object in the model's reply. Any
/// failure collapses to `None`, which the engine turns into a hold.
pub fn parse_decision(content: &str) -> Option<ParsedDecision> {
    let object = extract_json_object(content)?;
    let raw: RawDecision = serde_json::from_str(object).ok()?;
    let action = TradeAction::from_str(&raw.action).ok()?;
    let size_usd = match raw.size_usd {
        Some(serde_json::Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        Some(serde_json::Value::String(s)) => Decimal::from_str(&s).ok(),
        _ => None,
    };
    Some(ParsedDecision {
        action,
        asset: raw.asset.map(|a| a.to_uppercase()),
        size_usd,
        reasoning: raw
            .reasoning
            .unwrap_or_else(|| "no reasoning given".to_string()),
    })
}

pub struct AiEngine {
    store: Arc<Store>,
    cache: Arc<RateCache>,
    llm: Option<LlmClient>,
}

impl AiEngine {
    pub fn new(store: Arc<Store>, cache: Arc<RateCache>, llm: Option<LlmClient>) -> Self {
        if llm.is_none() {
            warn!("no OpenRouter key configured; agents will always hold");
        }
        Self { store, cache, llm }
    }

    /// Run one full cycle for the named agent and return its decision.
    pub async fn run_agent_cycle(&self, name: &str) -> Result<AiDecision> {
        let trader = self
            .store
            .trader_by_name(name)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("agent {name}")))?;

        let agg = self.cache.get().await;
        let mut positions = self.store.ai_open_positions(&trader.id).await?;
        let mut cash = trader.cash_balance;
        let now = Utc::now();

        self.accrue_funding(&mut positions, &agg, &mut cash, now)
            .await?;
        let mut open = self
            .sweep_stop_losses(&trader, positions, &agg, &mut cash, now)
            .await?;

        let parsed = self.decide(&trader, cash, &open, &agg).await;
        let decision = self
            .execute(&trader, parsed, &mut open, &agg, &mut cash, now)
            .await?;

        self.store.insert_decision(&decision).await?;
        self.store.update_trader_cash(&trader.id, cash).await?;

        info!(
            agent = %trader.name,
            action = ?decision.action,
            asset = decision.asset.as_deref().unwrap_or("-"),
            cash = %cash,
            "agent cycle complete"
        );
        Ok(decision)
    }

    async fn accrue_funding(
        &self,
        positions: &mut [AiPosition],
        agg: &AggregatedResult,
        cash: &mut Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for position in positions.iter_mut() {
            let Some(spread) = agg.spread_for(&position.asset) else {
                continue;
            };
            let Some(accrual) = accrue_ai_funding(position, spread.primary.rate_8h, now) else {
                continue;
            };
            position.funding_collected += accrual.earned;
            position.last_funding_at = accrual.last_funding_at;
            self.store
                .update_ai_position_funding(
                    &position.id,
                    position.funding_collected,
                    position.last_funding_at,
                )
                .await?;
            *cash += accrual.earned;
        }
        Ok(())
    }

    /// Force-close any position past the fixed stop; each close persists a
    /// synthetic decision explaining itself.
    async fn sweep_stop_losses(
        &self,
        trader: &AiTrader,
        positions: Vec<AiPosition>,
        agg: &AggregatedResult,
        cash: &mut Decimal,
        now: DateTime<Utc>,
    ) -> Result<Vec<AiPosition>> {
        let mut open = Vec::with_capacity(positions.len());
        for position in positions {
            let mark = agg
                .spread_for(&position.asset)
                .and_then(|s| s.primary.mark_price);
            let Some(mark) = mark else {
                open.push(position);
                continue;
            };

            let price_pct = ai_price_return_pct(&position, mark);
            if price_pct >= -AI_STOP_LOSS_PCT {
                open.push(position);
                continue;
            }

            let outcome = compute_ai_close(&position, mark);
            self.store
                .close_ai_position(&position.id, mark, outcome.realized_pnl, now)
                .await?;
            *cash += outcome.cash_credit;

            let decision = AiDecision {
                id: None,
                trader_id: trader.id.clone(),
                action: TradeAction::Close,
                asset: Some(position.asset.clone()),
                size_usd: Some(position.size_usd),
                reasoning: format!(
                    "Stop loss triggered on {} {}: price moved {:.2}% against entry (limit {}%)",
                    position.asset,
                    position.direction,
                    price_pct * dec!(100),
                    AI_STOP_LOSS_PCT * dec!(100),
                ),
                created_at: now,
            };
            self.store.insert_decision(&decision).await?;
            warn!(agent = %trader.name, asset = %position.asset, "stop loss closed position");
        }
        Ok(open)
    }

    /// Ask the model for an action; every failure mode degrades to hold.
    async fn decide(
        &self,
        trader: &AiTrader,
        cash: Decimal,
        positions: &[AiPosition],
        agg: &AggregatedResult,
    ) -> ParsedDecision {
        let Some(llm) = &self.llm else {
            return hold("LLM not configured, holding");
        };

        let system = prompt::persona_prompt(trader);
        let user = format!(
            "{}\n{}",
            prompt::market_context(agg),
            prompt::portfolio_context(cash, positions, agg),
        );

        match llm.chat(&trader.model, &system, &user).await {
            Ok(content) => parse_decision(&content)
                .unwrap_or_else(|| hold("could not parse a valid action from the LLM response")),
            Err(DeskError::LlmTimeout(secs)) => {
                hold(format!("LLM timed out after {secs}s — holding"))
            }
            Err(e) => hold(format!("LLM call failed: {e}")),
        }
    }

    /// Apply the decision, downgrading anything invalid or unaffordable.
    async fn execute(
        &self,
        trader: &AiTrader,
        parsed: ParsedDecision,
        positions: &mut Vec<AiPosition>,
        agg: &AggregatedResult,
        cash: &mut Decimal,
        now: DateTime<Utc>,
    ) -> Result<AiDecision> {
        let decision = match parsed.action {
            TradeAction::Hold => parsed,
            TradeAction::OpenLong | TradeAction::OpenShort => {
                self.execute_open(parsed, positions, agg, *cash, now, trader)
                    .await?
                    .map_or_else(|p| p, |(p, position, debit)| {
                        *cash -= debit;
                        positions.push(position);
                        p
                    })
            }
            TradeAction::Close => match self.execute_close(&parsed, positions, agg, now).await? {
                Ok(credit) => {
                    *cash += credit;
                    parsed
                }
                Err(downgraded) => downgraded,
            },
        };

        Ok(AiDecision {
            id: None,
            trader_id: trader.id.clone(),
            action: decision.action,
            asset: decision.asset,
            size_usd: decision.size_usd,
            reasoning: decision.reasoning,
            created_at: now,
        })
    }

    async fn execute_open(
        &self,
        parsed: ParsedDecision,
        positions: &[AiPosition],
        agg: &AggregatedResult,
        cash: Decimal,
        now: DateTime<Utc>,
        trader: &AiTrader,
    ) -> Result<std::result::Result<(ParsedDecision, AiPosition, Decimal), ParsedDecision>> {
        let Some(asset) = parsed.asset.clone() else {
            return Ok(Err(downgrade(parsed, "no asset specified")));
        };
        let Some((spread, mark)) = agg
            .spread_for(&asset)
            .and_then(|s| s.primary.mark_price.map(|m| (s, m)))
        else {
            return Ok(Err(downgrade(parsed, "asset not tradable right now")));
        };
        if positions.len() >= MAX_POSITIONS {
            return Ok(Err(downgrade(parsed, "position cap reached")));
        }
        if positions.iter().any(|p| p.asset == asset) {
            return Ok(Err(downgrade(parsed, "already holding this asset")));
        }
        let Some(requested) = parsed.size_usd else {
            return Ok(Err(downgrade(parsed, "no size specified")));
        };

        let mut unrealized = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        for position in positions {
            notional += position.size_usd;
            if let Some(m) = agg
                .spread_for(&position.asset)
                .and_then(|s| s.primary.mark_price)
            {
                unrealized += position.unrealized_pnl(m);
            }
        }
        let total_value = cash + notional + unrealized;
        let size = requested.min(total_value * MAX_SIZE_FRACTION);
        let fee = size * FEE_RATE;
        if size - fee < MIN_POSITION_USD {
            return Ok(Err(downgrade(parsed, "post-fee size below $100")));
        }
        if cash < size + fee {
            return Ok(Err(downgrade(parsed, "insufficient cash")));
        }

        let direction = match parsed.action {
            TradeAction::OpenLong => TradeDirection::Long,
            _ => TradeDirection::Short,
        };
        let position = AiPosition {
            id: Uuid::new_v4().to_string(),
            trader_id: trader.id.clone(),
            asset,
            direction,
            size_usd: size,
            entry_price: mark,
            entry_rate_8h: spread.primary.rate_8h,
            funding_collected: Decimal::ZERO,
            last_funding_at: now,
            opened_at: now,
            is_open: true,
            exit_price: None,
            realized_pnl: None,
            closed_at: None,
        };
        self.store.insert_ai_position(&position).await?;

        let mut accepted = parsed;
        accepted.size_usd = Some(size);
        Ok(Ok((accepted, position, size + fee)))
    }

    async fn execute_close(
        &self,
        parsed: &ParsedDecision,
        positions: &mut Vec<AiPosition>,
        agg: &AggregatedResult,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<Decimal, ParsedDecision>> {
        let Some(asset) = parsed.asset.clone() else {
            return Ok(Err(downgrade(parsed.clone(), "no asset specified")));
        };
        let Some(index) = positions.iter().position(|p| p.asset == asset) else {
            return Ok(Err(downgrade(parsed.clone(), "no open position in that asset")));
        };
        let Some(mark) = agg
            .spread_for(&asset)
            .and_then(|s| s.primary.mark_price)
        else {
            return Ok(Err(downgrade(parsed.clone(), "no current mark price")));
        };

        let position = positions.remove(index);
        let outcome = compute_ai_close(&position, mark);
        self.store
            .close_ai_position(&position.id, mark, outcome.realized_pnl, now)
            .await?;
        Ok(Ok(outcome.cash_credit))
    }
}

fn hold(reasoning: impl Into<String>) -> ParsedDecision {
    ParsedDecision {
        action: TradeAction::Hold,
        asset: None,
        size_usd: None,
        reasoning: reasoning.into(),
    }
}

fn downgrade(parsed: ParsedDecision, why: &str) -> ParsedDecision {
    ParsedDecision {
        action: TradeAction::Hold,
        asset: None,
        size_usd: None,
        reasoning: format!("{} [downgraded to hold: {why}]", parsed.reasoning),
    }
}
