//! Paper-trading engine.
//!
//! Runs every active portfolio once per poll cycle against the fresh
//! aggregate, in three ordered phases: funding accrual, exits (stop-loss
//! first, then the strategy rule), entries. A failure inside one portfolio is
//! logged and does not abort the others. In-memory cash is authoritative for
//! the cycle and persisted once at the end.
//!
//! Close accounting: funding is credited to cash as it accrues, so the close
//! credit is `sizeUsd + priceReturn - exitFee`; `realized_pnl` still carries
//! the funding term for attribution.

pub mod strategy;

pub use strategy::{EntryCandidate, Strategy, StrategyParams};

use crate::error::{DeskError, Result};
use crate::store::Store;
use crate::types::{
    AggregatedResult, FundingSpread, Portfolio, Position, Transaction, TxType, FEE_RATE,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Minimum accepted entry notional in USD.
const MIN_POSITION_USD: Decimal = dec!(100);

/// Outcome of one funding-accrual step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingAccrual {
    pub hours: i64,
    pub earned: Decimal,
    /// Advanced by whole hours only; the sub-hour remainder stays pending.
    pub last_funding_at: DateTime<Utc>,
}

/// Whole hours elapsed since the last accrual, paid at `rate8h / 8` per hour.
/// Shorts collect positive funding, longs collect negative.
pub fn accrue_funding(
    position: &Position,
    rate_8h: Decimal,
    now: DateTime<Utc>,
) -> Option<FundingAccrual> {
    let hours = (now - position.last_funding_at).num_hours();
    if hours <= 0 {
        return None;
    }
    let hourly_rate = rate_8h / dec!(8);
    let earned = position.size_usd * hourly_rate * Decimal::from(hours) * position.side.sign();
    Some(FundingAccrual {
        hours,
        earned,
        last_funding_at: position.last_funding_at + Duration::hours(hours),
    })
}

/// Signed price move as a fraction of entry; losses are negative.
pub fn price_return_pct(position: &Position, mark: Decimal) -> Decimal {
    if position.entry_price.is_zero() {
        return Decimal::ZERO;
    }
    position.side.sign() * (position.entry_price - mark) / position.entry_price
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    Strategy,
}

impl ExitReason {
    fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Strategy => "strategy_exit",
        }
    }
}

/// Exit decision for one open position. The stop-loss is evaluated before the
/// strategy rule and wins when both fire on the same cycle.
pub fn exit_reason(
    strategy: Strategy,
    params: &StrategyParams,
    position: &Position,
    spread: &FundingSpread,
    mark: Decimal,
) -> Option<ExitReason> {
    if price_return_pct(position, mark) < -params.stop_loss_pct {
        return Some(ExitReason::StopLoss);
    }
    if strategy.should_exit(params, spread, position.side) {
        return Some(ExitReason::Strategy);
    }
    None
}

/// Fees, P&L, and cash movement for closing a position at `mark`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloseOutcome {
    pub price_return: Decimal,
    pub exit_fee: Decimal,
    pub realized_pnl: Decimal,
    pub cash_credit: Decimal,
}

pub fn compute_close(position: &Position, mark: Decimal) -> CloseOutcome {
    let price_return = price_return_pct(position, mark) * position.size_usd;
    let exit_fee = position.size_usd * FEE_RATE;
    CloseOutcome {
        price_return,
        exit_fee,
        realized_pnl: price_return + position.total_funding_collected - exit_fee,
        cash_credit: position.size_usd + price_return - exit_fee,
    }
}

/// Mark-to-market roll-up of a set of open positions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Valuation {
    pub notional: Decimal,
    pub unrealized_pnl: Decimal,
    pub funding_collected: Decimal,
    pub open_positions: u32,
}

impl Valuation {
    /// Funding already sits in cash, so it is not added again here.
    pub fn total_value(&self, cash: Decimal) -> Decimal {
        cash + self.notional + self.unrealized_pnl
    }
}

pub fn mark_to_market(positions: &[Position], agg: &AggregatedResult) -> Valuation {
    let mut valuation = Valuation::default();
    for position in positions {
        valuation.notional += position.size_usd;
        valuation.funding_collected += position.total_funding_collected;
        valuation.open_positions += 1;
        let mark = agg
            .spread_for(&position.asset)
            .and_then(|s| s.primary.mark_price);
        if let Some(mark) = mark {
            valuation.unrealized_pnl += position.unrealized_pnl(mark);
        }
    }
    valuation
}

/// What one portfolio cycle did, for logging and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    pub funding_events: usize,
    pub closed: usize,
    pub opened: usize,
    pub cash_end: Decimal,
}

pub struct PaperEngine {
    store: Arc<Store>,
}

impl PaperEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Drive every active portfolio once against `agg`.
    pub async fn run_all(&self, agg: &AggregatedResult) {
        let portfolios = match self.store.active_portfolios().await {
            Ok(portfolios) => portfolios,
            Err(e) => {
                warn!(error = %e, "could not load portfolios, skipping trading cycle");
                return;
            }
        };

        for portfolio in portfolios {
            if let Err(e) = self.run_portfolio(&portfolio, agg).await {
                error!(
                    portfolio = %portfolio.id,
                    strategy = %portfolio.strategy_name,
                    error = %e,
                    "portfolio cycle failed"
                );
            }
        }
    }

    pub async fn run_portfolio(
        &self,
        portfolio: &Portfolio,
        agg: &AggregatedResult,
    ) -> Result<CycleReport> {
        let strategy = Strategy::from_name(&portfolio.strategy_name).ok_or_else(|| {
            DeskError::Validation(format!("unknown strategy: {}", portfolio.strategy_name))
        })?;
        let params = StrategyParams::from_config(&portfolio.strategy_config);
        let now = Utc::now();
        let mut cash = portfolio.cash_balance;
        let mut report = CycleReport::default();

        let mut positions = self.store.open_positions(&portfolio.id).await?;

        // Phase 1: funding accrual.
        for position in positions.iter_mut() {
            let Some(spread) = agg.spread_for(&position.asset) else {
                continue;
            };
            let Some(accrual) = accrue_funding(position, spread.primary.rate_8h, now) else {
                continue;
            };
            position.total_funding_collected += accrual.earned;
            position.last_funding_at = accrual.last_funding_at;
            self.store
                .update_position_funding(
                    &position.id,
                    position.total_funding_collected,
                    position.last_funding_at,
                )
                .await?;
            self.store
                .insert_transaction(&transaction(
                    portfolio,
                    Some(&position.id),
                    TxType::Funding,
                    &position.asset,
                    accrual.earned,
                    format!(
                        "funding {}h on {} {}",
                        accrual.hours, position.asset, position.side
                    ),
                ))
                .await?;
            cash += accrual.earned;
            report.funding_events += 1;
        }

        // Phase 2: exits. Stop-loss runs before the strategy rule.
        let mut remaining = Vec::with_capacity(positions.len());
        for position in positions {
            let decision = agg
                .spread_for(&position.asset)
                .and_then(|spread| spread.primary.mark_price.map(|mark| (spread, mark)))
                .and_then(|(spread, mark)| {
                    exit_reason(strategy, &params, &position, spread, mark)
                        .map(|reason| (reason, mark))
                });

            let Some((reason, mark)) = decision else {
                remaining.push(position);
                continue;
            };

            let outcome = compute_close(&position, mark);
            self.store
                .close_position(
                    &position.id,
                    mark,
                    outcome.realized_pnl,
                    position.fees_paid + outcome.exit_fee,
                    now,
                )
                .await?;
            self.store
                .insert_transaction(&transaction(
                    portfolio,
                    Some(&position.id),
                    TxType::Close,
                    &position.asset,
                    outcome.cash_credit,
                    format!(
                        "close {} {} ({}) pnl {:.2}",
                        position.asset,
                        position.side,
                        reason.as_str(),
                        outcome.realized_pnl
                    ),
                ))
                .await?;
            cash += outcome.cash_credit;
            report.closed += 1;
        }

        // Phase 3: entries. Total value counts remaining notionals at cost.
        let open_notional: Decimal = remaining.iter().map(|p| p.size_usd).sum();
        let total_value = cash + open_notional;
        let max_position_size = total_value * params.max_position_size_pct;
        let mut open_assets: HashSet<String> = remaining.iter().map(|p| p.asset.clone()).collect();
        let mut open_count = remaining.len();

        if open_count < params.max_positions && cash >= max_position_size * dec!(0.5) {
            for candidate in strategy.candidates(&params, &agg.spreads) {
                if open_count >= params.max_positions {
                    break;
                }
                if open_assets.contains(&candidate.spread.asset) {
                    continue;
                }
                let Some(mark) = candidate.spread.primary.mark_price else {
                    continue;
                };

                let position_size = max_position_size.min(cash - max_position_size * FEE_RATE);
                if position_size < MIN_POSITION_USD {
                    break;
                }
                let fee = position_size * FEE_RATE;
                if cash < position_size + fee {
                    break;
                }

                let position = Position {
                    id: Uuid::new_v4().to_string(),
                    portfolio_id: portfolio.id.clone(),
                    asset: candidate.spread.asset.clone(),
                    side: candidate.side,
                    size_usd: position_size,
                    entry_rate_8h: candidate.spread.primary.rate_8h,
                    entry_spread: candidate.spread.max_spread,
                    entry_price: mark,
                    total_funding_collected: Decimal::ZERO,
                    last_funding_at: now,
                    opened_at: now,
                    is_open: true,
                    exit_price: None,
                    realized_pnl: None,
                    closed_at: None,
                    fees_paid: fee,
                };
                self.store.insert_position(&position).await?;
                self.store
                    .insert_transaction(&transaction(
                        portfolio,
                        Some(&position.id),
                        TxType::Open,
                        &position.asset,
                        -position_size,
                        format!("open {} {} @ {}", position.asset, position.side, mark),
                    ))
                    .await?;
                self.store
                    .insert_transaction(&transaction(
                        portfolio,
                        Some(&position.id),
                        TxType::Fee,
                        &position.asset,
                        -fee,
                        format!("entry fee on {}", position.asset),
                    ))
                    .await?;

                cash -= position_size + fee;
                open_assets.insert(position.asset);
                open_count += 1;
                report.opened += 1;
            }
        }

        self.store.update_portfolio_cash(&portfolio.id, cash).await?;
        report.cash_end = cash;

        info!(
            portfolio = %portfolio.id,
            strategy = %strategy,
            funding_events = report.funding_events,
            closed = report.closed,
            opened = report.opened,
            cash = %cash,
            "portfolio cycle complete"
        );
        Ok(report)
    }
}

fn transaction(
    portfolio: &Portfolio,
    position_id: Option<&str>,
    tx_type: TxType,
    asset: &str,
    amount: Decimal,
    description: String,
) -> Transaction {
    Transaction {
        id: Uuid::new_v4().to_string(),
        portfolio_id: portfolio.id.clone(),
        position_id: position_id.map(str::to_string),
        tx_type,
        asset: asset.to_string(),
        amount,
        description,
        created_at: Utc::now(),
    }
}
