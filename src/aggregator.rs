//! Cross-venue aggregation.
//!
//! Fans out to every adapter concurrently, waits for all of them to settle,
//! and reconciles the results into per-asset spreads against the primary
//! venue. A failing CEX degrades to an empty contribution; a failing primary
//! yields an empty result and the poll loop carries on.

use crate::error::Result;
use crate::types::{AggregatedResult, FundingRate, FundingSpread, Venue};
use crate::venues::{BinanceAdapter, BybitAdapter, HyperliquidAdapter, OkxAdapter, VenueAdapter};
use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Aggregator {
    primary: Arc<dyn VenueAdapter>,
    cex: Vec<Arc<dyn VenueAdapter>>,
}

impl Aggregator {
    pub fn new(venue_timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            primary: Arc::new(HyperliquidAdapter::new(venue_timeout_secs)?),
            cex: vec![
                Arc::new(BinanceAdapter::new(venue_timeout_secs)?),
                Arc::new(BybitAdapter::new(venue_timeout_secs)?),
                Arc::new(OkxAdapter::new(venue_timeout_secs)?),
            ],
        })
    }

    /// Fetch every venue and compute the spread table.
    pub async fn aggregate(&self) -> AggregatedResult {
        let mut fetches = Vec::with_capacity(1 + self.cex.len());
        fetches.push(self.primary.fetch());
        for adapter in &self.cex {
            fetches.push(adapter.fetch());
        }
        let mut results = join_all(fetches).await;

        let primary_rates = match results.remove(0) {
            Ok(rates) => rates,
            Err(e) => {
                warn!(error = %e, "primary venue fetch failed, returning empty aggregate");
                return AggregatedResult::empty();
            }
        };

        let mut cex_rates: Vec<Vec<FundingRate>> = Vec::with_capacity(self.cex.len());
        for (adapter, result) in self.cex.iter().zip(results) {
            match result {
                Ok(rates) => cex_rates.push(rates),
                Err(e) => {
                    warn!(venue = %adapter.venue(), error = %e, "cex fetch failed, contribution dropped");
                    cex_rates.push(Vec::new());
                }
            }
        }

        let result = build_result(primary_rates, cex_rates);
        debug!(
            spreads = result.spreads.len(),
            rates = result.all_rates.len(),
            "aggregation complete"
        );
        result
    }
}

fn build_result(primary_rates: Vec<FundingRate>, cex_rates: Vec<Vec<FundingRate>>) -> AggregatedResult {
    let by_asset: Vec<HashMap<&str, &FundingRate>> = cex_rates
        .iter()
        .map(|rates| rates.iter().map(|r| (r.asset.as_str(), r)).collect())
        .collect();

    let mut spreads: Vec<FundingSpread> = primary_rates
        .iter()
        .map(|primary| {
            let mut cex = BTreeMap::new();
            for venue_map in &by_asset {
                if let Some(rate) = venue_map.get(primary.asset.as_str()) {
                    cex.insert(rate.venue, (*rate).clone());
                }
            }
            compute_spread(primary.clone(), cex)
        })
        .collect();

    spreads.sort_by(|a, b| {
        b.max_spread
            .abs()
            .cmp(&a.max_spread.abs())
            .then_with(|| a.asset.cmp(&b.asset))
    });

    let mut all_rates = primary_rates;
    for rates in cex_rates {
        all_rates.extend(rates);
    }

    AggregatedResult {
        spreads,
        all_rates,
        timestamp: Utc::now(),
    }
}

/// The best CEX is the one whose 8h rate has the largest absolute value.
fn compute_spread(primary: FundingRate, cex: BTreeMap<Venue, FundingRate>) -> FundingSpread {
    let best = cex
        .values()
        .max_by(|a, b| a.rate_8h.abs().cmp(&b.rate_8h.abs()))
        .map(|r| (r.venue, r.rate_8h));

    let (best_cex, best_cex_rate, max_spread) = match best {
        Some((venue, rate)) => (Some(venue), Some(rate), primary.rate_8h - rate),
        None => (None, None, Decimal::ZERO),
    };

    FundingSpread {
        asset: primary.asset.clone(),
        primary,
        cex,
        best_cex,
        best_cex_rate,
        max_spread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rate(asset: &str, venue: Venue, rate_8h: Decimal) -> FundingRate {
        FundingRate {
            asset: asset.to_string(),
            venue,
            rate_8h,
            rate_raw: rate_8h,
            next_funding_time: None,
            open_interest: None,
            mark_price: None,
            change_24h: None,
            volume_24h: None,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn best_cex_is_largest_absolute_rate() {
        let primary = rate("HYPE", Venue::Hyperliquid, dec!(0.006));
        let mut cex = BTreeMap::new();
        cex.insert(Venue::Bybit, rate("HYPE", Venue::Bybit, dec!(0.0001)));
        cex.insert(Venue::Okx, rate("HYPE", Venue::Okx, dec!(-0.005)));

        let spread = compute_spread(primary, cex);

        assert_eq!(spread.best_cex, Some(Venue::Okx));
        assert_eq!(spread.best_cex_rate, Some(dec!(-0.005)));
        assert_eq!(spread.max_spread, dec!(0.011));
    }

    #[test]
    fn no_cex_yields_zero_spread() {
        let spread = compute_spread(rate("TIA", Venue::Hyperliquid, dec!(0.002)), BTreeMap::new());
        assert_eq!(spread.best_cex, None);
        assert_eq!(spread.best_cex_rate, None);
        assert_eq!(spread.max_spread, Decimal::ZERO);
    }

    #[test]
    fn spreads_sort_by_absolute_spread_descending() {
        let primary = vec![
            rate("AAA", Venue::Hyperliquid, dec!(0.001)),
            rate("BBB", Venue::Hyperliquid, dec!(-0.004)),
            rate("CCC", Venue::Hyperliquid, dec!(0.0002)),
        ];
        let cex = vec![vec![
            rate("AAA", Venue::Binance, dec!(0.0005)),
            rate("BBB", Venue::Binance, dec!(0.001)),
            rate("CCC", Venue::Binance, dec!(0.0001)),
        ]];

        let result = build_result(primary, cex);
        let order: Vec<&str> = result.spreads.iter().map(|s| s.asset.as_str()).collect();

        // |−0.005| > |0.0005| > |0.0001|
        assert_eq!(order, vec!["BBB", "AAA", "CCC"]);
        assert_eq!(result.all_rates.len(), 6);
    }

    #[test]
    fn spread_invariant_holds_per_asset() {
        let primary = vec![rate("ETH", Venue::Hyperliquid, dec!(0.0008))];
        let cex = vec![
            vec![rate("ETH", Venue::Binance, dec!(0.0002))],
            vec![rate("ETH", Venue::Bybit, dec!(-0.0009))],
        ];

        let result = build_result(primary, cex);
        let spread = &result.spreads[0];
        let best = spread.cex.get(&spread.best_cex.unwrap()).unwrap();

        assert_eq!(spread.max_spread, spread.primary.rate_8h - best.rate_8h);
        for other in spread.cex.values() {
            assert!(best.rate_8h.abs() >= other.rate_8h.abs());
        }
    }

    #[test]
    fn assets_missing_on_primary_get_no_spread() {
        let primary = vec![rate("BTC", Venue::Hyperliquid, dec!(0.0001))];
        let cex = vec![vec![
            rate("BTC", Venue::Binance, dec!(0.0001)),
            rate("PEPE", Venue::Binance, dec!(0.01)),
        ]];

        let result = build_result(primary, cex);
        assert_eq!(result.spreads.len(), 1);
        assert_eq!(result.spreads[0].asset, "BTC");
        // but the raw rate still lands in allRates
        assert!(result.all_rates.iter().any(|r| r.asset == "PEPE"));
    }
}
