//! Hourly equity snapshots.
//!
//! One snapshot per portfolio and per agent: mark-to-market total value,
//! cash, unrealized price P&L, cumulative funding on open positions, and the
//! open position count. Funding is already realized into cash; it is reported
//! separately for attribution, not added into the total twice.

use crate::cache::RateCache;
use crate::error::Result;
use crate::paper::mark_to_market;
use crate::store::Store;
use crate::types::{AggregatedResult, AiPosition, EquitySnapshot, OwnerKind};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct Sampler {
    store: Arc<Store>,
    cache: Arc<RateCache>,
}

impl Sampler {
    pub fn new(store: Arc<Store>, cache: Arc<RateCache>) -> Self {
        Self { store, cache }
    }

    /// Snapshot every portfolio and agent once; returns how many rows landed.
    pub async fn snapshot_all(&self) -> Result<usize> {
        let agg = self.cache.get().await;
        let now = Utc::now();
        let mut snapshots = Vec::new();

        for portfolio in self.store.all_portfolios().await? {
            let positions = self.store.open_positions(&portfolio.id).await?;
            let valuation = mark_to_market(&positions, &agg);
            snapshots.push(EquitySnapshot {
                owner_id: portfolio.id.clone(),
                owner_kind: OwnerKind::Portfolio,
                snapshot_at: now,
                total_value: valuation.total_value(portfolio.cash_balance),
                cash_balance: portfolio.cash_balance,
                unrealized_pnl: valuation.unrealized_pnl,
                funding_collected: valuation.funding_collected,
                open_positions: valuation.open_positions,
            });
        }

        for trader in self.store.all_traders().await? {
            let positions = self.store.ai_open_positions(&trader.id).await?;
            let (unrealized, funding, notional) = ai_valuation(&positions, &agg);
            snapshots.push(EquitySnapshot {
                owner_id: trader.id.clone(),
                owner_kind: OwnerKind::Agent,
                snapshot_at: now,
                total_value: trader.cash_balance + notional + unrealized,
                cash_balance: trader.cash_balance,
                unrealized_pnl: unrealized,
                funding_collected: funding,
                open_positions: positions.len() as u32,
            });
        }

        self.store.insert_snapshots(&snapshots).await?;
        info!(count = snapshots.len(), "equity snapshots recorded");
        Ok(snapshots.len())
    }

    /// Background hourly driver for serve mode.
    pub fn spawn_hourly(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval fires immediately; skip the startup tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.snapshot_all().await {
                    error!(error = %e, "snapshot sampling failed");
                }
            }
        });
    }
}

/// (unrealized, funding, notional) across an agent's open positions.
pub fn ai_valuation(
    positions: &[AiPosition],
    agg: &AggregatedResult,
) -> (Decimal, Decimal, Decimal) {
    let mut unrealized = Decimal::ZERO;
    let mut funding = Decimal::ZERO;
    let mut notional = Decimal::ZERO;
    for position in positions {
        notional += position.size_usd;
        funding += position.funding_collected;
        if let Some(mark) = agg
            .spread_for(&position.asset)
            .and_then(|s| s.primary.mark_price)
        {
            unrealized += position.unrealized_pnl(mark);
        }
    }
    (unrealized, funding, notional)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FundingRate, FundingSpread, TradeDirection, Venue};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[test]
    fn ai_valuation_sums_open_positions() {
        let spread = FundingSpread {
            asset: "BTC".to_string(),
            primary: FundingRate {
                asset: "BTC".to_string(),
                venue: Venue::Hyperliquid,
                rate_8h: dec!(0.0004),
                rate_raw: dec!(0.00005),
                next_funding_time: None,
                open_interest: None,
                mark_price: Some(dec!(110)),
                change_24h: None,
                volume_24h: None,
                observed_at: Utc::now(),
            },
            cex: BTreeMap::new(),
            best_cex: None,
            best_cex_rate: None,
            max_spread: Decimal::ZERO,
        };
        let agg = AggregatedResult {
            spreads: vec![spread],
            all_rates: Vec::new(),
            timestamp: Utc::now(),
        };
        let position = AiPosition {
            id: "p".to_string(),
            trader_id: "t".to_string(),
            asset: "BTC".to_string(),
            direction: TradeDirection::Long,
            size_usd: dec!(1000),
            entry_price: dec!(100),
            entry_rate_8h: dec!(0.0004),
            funding_collected: dec!(3),
            last_funding_at: Utc::now(),
            opened_at: Utc::now(),
            is_open: true,
            exit_price: None,
            realized_pnl: None,
            closed_at: None,
        };

        let (unrealized, funding, notional) = ai_valuation(&[position], &agg);
        assert_eq!(unrealized, dec!(100)); // +10% on 1000 long
        assert_eq!(funding, dec!(3));
        assert_eq!(notional, dec!(1000));
    }
}
