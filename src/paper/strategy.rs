//! Paper-trading strategies.
//!
//! A closed set of variants dispatched by tag. Each strategy contributes an
//! entry-candidate filter with its own ranking, and an exit rule evaluated
//! after the shared stop-loss. Thresholds come from the portfolio's opaque
//! config map with per-strategy defaults; both `enter_*` and the legacy
//! `entry_*` key spellings are accepted, `enter_*` winning on conflict.

use crate::types::{FundingSpread, PositionSide};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Aggressive,
    Conservative,
    Diversified,
    NegativeFade,
    RegimeAdaptive,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aggressive" => Some(Strategy::Aggressive),
            "conservative" => Some(Strategy::Conservative),
            "diversified" => Some(Strategy::Diversified),
            "negative_fade" => Some(Strategy::NegativeFade),
            "regime_adaptive" => Some(Strategy::RegimeAdaptive),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Aggressive => "aggressive",
            Strategy::Conservative => "conservative",
            Strategy::Diversified => "diversified",
            Strategy::NegativeFade => "negative_fade",
            Strategy::RegimeAdaptive => "regime_adaptive",
        };
        f.write_str(name)
    }
}

/// Recognized strategy-config keys with their defaults applied.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub max_position_size_pct: Decimal,
    pub max_positions: usize,
    pub stop_loss_pct: Decimal,
    exit_rate_threshold: Option<Decimal>,
    pub exit_spread_threshold: Decimal,
    pub enter_rate_threshold: Decimal,
    enter_spread_threshold: Option<Decimal>,
    pub allowed_assets: Vec<String>,
    pub top_n_by_oi: usize,
    pub positive_rate_threshold: Decimal,
    pub negative_rate_threshold: Decimal,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            max_position_size_pct: dec!(0.20),
            max_positions: 5,
            stop_loss_pct: dec!(0.10),
            exit_rate_threshold: None,
            exit_spread_threshold: dec!(0.01),
            enter_rate_threshold: dec!(-0.05),
            enter_spread_threshold: None,
            allowed_assets: vec!["BTC".to_string(), "ETH".to_string()],
            top_n_by_oi: 20,
            positive_rate_threshold: dec!(0.0003),
            negative_rate_threshold: dec!(0.0003),
        }
    }
}

impl StrategyParams {
    pub fn from_config(config: &Value) -> Self {
        let defaults = Self::default();
        Self {
            max_position_size_pct: decimal_key(config, "max_position_size_pct")
                .unwrap_or(defaults.max_position_size_pct),
            max_positions: usize_key(config, "max_positions").unwrap_or(defaults.max_positions),
            stop_loss_pct: decimal_key(config, "stop_loss_pct").unwrap_or(defaults.stop_loss_pct),
            exit_rate_threshold: dual_key(config, "exit_rate_threshold"),
            exit_spread_threshold: dual_key(config, "exit_spread_threshold")
                .unwrap_or(defaults.exit_spread_threshold),
            enter_rate_threshold: dual_key(config, "enter_rate_threshold")
                .unwrap_or(defaults.enter_rate_threshold),
            enter_spread_threshold: dual_key(config, "enter_spread_threshold"),
            allowed_assets: assets_key(config).unwrap_or(defaults.allowed_assets),
            top_n_by_oi: usize_key(config, "top_n_by_oi").unwrap_or(defaults.top_n_by_oi),
            positive_rate_threshold: decimal_key(config, "positive_rate_threshold")
                .unwrap_or(defaults.positive_rate_threshold),
            negative_rate_threshold: decimal_key(config, "negative_rate_threshold")
                .unwrap_or(defaults.negative_rate_threshold),
        }
    }

    /// Strategy-dependent exit-rate default.
    pub fn exit_rate_threshold(&self, strategy: Strategy) -> Decimal {
        self.exit_rate_threshold.unwrap_or(match strategy {
            Strategy::NegativeFade => dec!(-0.01),
            _ => dec!(0.0001),
        })
    }

    /// Strategy-dependent entry-spread default.
    pub fn enter_spread_threshold(&self, strategy: Strategy) -> Decimal {
        self.enter_spread_threshold.unwrap_or(match strategy {
            Strategy::Conservative => dec!(0.05),
            Strategy::Diversified => dec!(0.04),
            _ => dec!(0.03),
        })
    }
}

fn decimal_key(config: &Value, key: &str) -> Option<Decimal> {
    match config.get(key)? {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

/// `enter_*` spelling wins over the legacy `entry_*` one.
fn dual_key(config: &Value, key: &str) -> Option<Decimal> {
    decimal_key(config, key).or_else(|| decimal_key(config, &key.replacen("enter_", "entry_", 1)))
}

fn usize_key(config: &Value, key: &str) -> Option<usize> {
    config.get(key)?.as_u64().map(|n| n as usize)
}

fn assets_key(config: &Value) -> Option<Vec<String>> {
    let list = config.get("allowed_assets")?.as_array()?;
    Some(
        list.iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_uppercase())
            .collect(),
    )
}

/// A ranked entry opportunity.
#[derive(Debug, Clone, Copy)]
pub struct EntryCandidate<'a> {
    pub spread: &'a FundingSpread,
    pub side: PositionSide,
}

impl Strategy {
    /// Strategy exit rule; the shared stop-loss has already been checked.
    pub fn should_exit(
        &self,
        params: &StrategyParams,
        spread: &FundingSpread,
        side: PositionSide,
    ) -> bool {
        let rate = spread.primary.rate_8h;
        match self {
            Strategy::NegativeFade => rate > params.exit_rate_threshold(*self),
            Strategy::RegimeAdaptive => {
                let threshold = params.exit_rate_threshold(*self);
                match side {
                    PositionSide::LongPerp => rate > threshold,
                    PositionSide::ShortPerp => rate < -threshold,
                }
            }
            _ => spread.max_spread < params.exit_spread_threshold,
        }
    }

    /// Ranked entry candidates out of the current spread table.
    pub fn candidates<'a>(
        &self,
        params: &StrategyParams,
        spreads: &'a [FundingSpread],
    ) -> Vec<EntryCandidate<'a>> {
        match self {
            Strategy::NegativeFade => {
                let mut picks: Vec<&FundingSpread> = spreads
                    .iter()
                    .filter(|s| s.primary.rate_8h < params.enter_rate_threshold)
                    .collect();
                picks.sort_by(|a, b| a.primary.rate_8h.cmp(&b.primary.rate_8h));
                picks
                    .into_iter()
                    .map(|spread| EntryCandidate {
                        spread,
                        side: PositionSide::LongPerp,
                    })
                    .collect()
            }
            Strategy::Conservative => {
                let threshold = params.enter_spread_threshold(*self);
                short_spread_candidates(spreads, threshold, |s| {
                    params.allowed_assets.iter().any(|a| a == &s.asset)
                })
            }
            Strategy::Diversified => {
                let threshold = params.enter_spread_threshold(*self);
                let mut by_oi: Vec<&FundingSpread> = spreads.iter().collect();
                by_oi.sort_by(|a, b| {
                    b.primary
                        .open_interest
                        .unwrap_or(Decimal::ZERO)
                        .cmp(&a.primary.open_interest.unwrap_or(Decimal::ZERO))
                });
                let universe: Vec<&str> = by_oi
                    .into_iter()
                    .take(params.top_n_by_oi)
                    .map(|s| s.asset.as_str())
                    .collect();
                short_spread_candidates(spreads, threshold, |s| {
                    universe.contains(&s.asset.as_str())
                })
            }
            Strategy::RegimeAdaptive => {
                let mut shorts: Vec<&FundingSpread> = spreads
                    .iter()
                    .filter(|s| s.primary.rate_8h > params.positive_rate_threshold)
                    .collect();
                let mut longs: Vec<&FundingSpread> = spreads
                    .iter()
                    .filter(|s| s.primary.rate_8h < -params.negative_rate_threshold)
                    .collect();
                shorts.sort_by(|a, b| b.primary.rate_8h.abs().cmp(&a.primary.rate_8h.abs()));
                longs.sort_by(|a, b| b.primary.rate_8h.abs().cmp(&a.primary.rate_8h.abs()));

                let best_short = shorts.first().map(|s| s.primary.rate_8h.abs());
                let best_long = longs.first().map(|s| s.primary.rate_8h.abs());
                let (bucket, side) = match (best_short, best_long) {
                    (Some(s), Some(l)) if l > s => (longs, PositionSide::LongPerp),
                    (Some(_), _) => (shorts, PositionSide::ShortPerp),
                    (None, Some(_)) => (longs, PositionSide::LongPerp),
                    (None, None) => (Vec::new(), PositionSide::ShortPerp),
                };
                bucket
                    .into_iter()
                    .map(|spread| EntryCandidate { spread, side })
                    .collect()
            }
            Strategy::Aggressive => {
                let threshold = params.enter_spread_threshold(*self);
                short_spread_candidates(spreads, threshold, |_| true)
            }
        }
    }
}

/// Shared shape of the short-the-spread strategies: positive primary rate,
/// spread above threshold, ranked by spread descending.
fn short_spread_candidates<'a>(
    spreads: &'a [FundingSpread],
    threshold: Decimal,
    extra: impl Fn(&FundingSpread) -> bool,
) -> Vec<EntryCandidate<'a>> {
    let mut picks: Vec<&FundingSpread> = spreads
        .iter()
        .filter(|s| s.max_spread > threshold && s.primary.rate_8h > Decimal::ZERO && extra(s))
        .collect();
    picks.sort_by(|a, b| b.max_spread.cmp(&a.max_spread));
    picks
        .into_iter()
        .map(|spread| EntryCandidate {
            spread,
            side: PositionSide::ShortPerp,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FundingRate, Venue};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn spread(asset: &str, rate_8h: Decimal, max_spread: Decimal, oi: Option<Decimal>) -> FundingSpread {
        FundingSpread {
            asset: asset.to_string(),
            primary: FundingRate {
                asset: asset.to_string(),
                venue: Venue::Hyperliquid,
                rate_8h,
                rate_raw: rate_8h,
                next_funding_time: None,
                open_interest: oi,
                mark_price: Some(dec!(100)),
                change_24h: None,
                volume_24h: None,
                observed_at: Utc::now(),
            },
            cex: BTreeMap::new(),
            best_cex: None,
            best_cex_rate: None,
            max_spread,
        }
    }

    #[test]
    fn params_fall_back_to_defaults() {
        let params = StrategyParams::from_config(&json!({}));
        assert_eq!(params.max_position_size_pct, dec!(0.20));
        assert_eq!(params.max_positions, 5);
        assert_eq!(params.stop_loss_pct, dec!(0.10));
        assert_eq!(params.exit_spread_threshold, dec!(0.01));
        assert_eq!(params.enter_rate_threshold, dec!(-0.05));
        assert_eq!(params.allowed_assets, vec!["BTC", "ETH"]);
        assert_eq!(params.top_n_by_oi, 20);
    }

    #[test]
    fn strategy_dependent_defaults() {
        let params = StrategyParams::default();
        assert_eq!(params.exit_rate_threshold(Strategy::NegativeFade), dec!(-0.01));
        assert_eq!(params.exit_rate_threshold(Strategy::RegimeAdaptive), dec!(0.0001));
        assert_eq!(params.enter_spread_threshold(Strategy::Conservative), dec!(0.05));
        assert_eq!(params.enter_spread_threshold(Strategy::Diversified), dec!(0.04));
        assert_eq!(params.enter_spread_threshold(Strategy::Aggressive), dec!(0.03));
    }

    #[test]
    fn enter_prefix_wins_over_entry() {
        let params = StrategyParams::from_config(&json!({
            "enter_spread_threshold": 0.07,
            "entry_spread_threshold": 0.02,
        }));
        assert_eq!(params.enter_spread_threshold(Strategy::Aggressive), dec!(0.07));

        let legacy_only = StrategyParams::from_config(&json!({
            "entry_spread_threshold": 0.02,
        }));
        assert_eq!(
            legacy_only.enter_spread_threshold(Strategy::Aggressive),
            dec!(0.02)
        );
    }

    #[test]
    fn numeric_strings_parse_too() {
        let params = StrategyParams::from_config(&json!({"stop_loss_pct": "0.25"}));
        assert_eq!(params.stop_loss_pct, dec!(0.25));
    }

    #[test]
    fn aggressive_ranks_by_spread() {
        let spreads = vec![
            spread("AAA", dec!(0.001), dec!(0.04), None),
            spread("BBB", dec!(0.002), dec!(0.08), None),
            spread("CCC", dec!(-0.001), dec!(0.09), None), // negative rate filtered
            spread("DDD", dec!(0.002), dec!(0.01), None),  // below threshold
        ];
        let picks = Strategy::Aggressive.candidates(&StrategyParams::default(), &spreads);
        let assets: Vec<&str> = picks.iter().map(|c| c.spread.asset.as_str()).collect();
        assert_eq!(assets, vec!["BBB", "AAA"]);
        assert!(picks.iter().all(|c| c.side == PositionSide::ShortPerp));
    }

    #[test]
    fn conservative_restricts_to_allowed_assets() {
        let spreads = vec![
            spread("BTC", dec!(0.001), dec!(0.06), None),
            spread("SOL", dec!(0.002), dec!(0.09), None),
        ];
        let picks = Strategy::Conservative.candidates(&StrategyParams::default(), &spreads);
        let assets: Vec<&str> = picks.iter().map(|c| c.spread.asset.as_str()).collect();
        assert_eq!(assets, vec!["BTC"]);
    }

    #[test]
    fn diversified_limits_to_top_oi_universe() {
        let mut params = StrategyParams::default();
        params.top_n_by_oi = 2;
        let spreads = vec![
            spread("AAA", dec!(0.001), dec!(0.05), Some(dec!(100))),
            spread("BBB", dec!(0.001), dec!(0.05), Some(dec!(900))),
            spread("CCC", dec!(0.001), dec!(0.06), Some(dec!(500))),
        ];
        let picks = Strategy::Diversified.candidates(&params, &spreads);
        let assets: Vec<&str> = picks.iter().map(|c| c.spread.asset.as_str()).collect();
        // AAA has the third-largest OI and falls outside the universe.
        assert_eq!(assets, vec!["CCC", "BBB"]);
    }

    #[test]
    fn negative_fade_goes_long_most_negative_first() {
        let spreads = vec![
            spread("AAA", dec!(-0.06), dec!(0.0), None),
            spread("BBB", dec!(-0.10), dec!(0.0), None),
            spread("CCC", dec!(-0.01), dec!(0.0), None), // above enter threshold
        ];
        let picks = Strategy::NegativeFade.candidates(&StrategyParams::default(), &spreads);
        let assets: Vec<&str> = picks.iter().map(|c| c.spread.asset.as_str()).collect();
        assert_eq!(assets, vec!["BBB", "AAA"]);
        assert!(picks.iter().all(|c| c.side == PositionSide::LongPerp));
    }

    #[test]
    fn regime_adaptive_picks_the_stronger_bucket() {
        let spreads = vec![
            spread("POS", dec!(0.0005), dec!(0.0), None),
            spread("NEG", dec!(-0.002), dec!(0.0), None),
        ];
        let picks = Strategy::RegimeAdaptive.candidates(&StrategyParams::default(), &spreads);
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].spread.asset, "NEG");
        assert_eq!(picks[0].side, PositionSide::LongPerp);

        let spreads = vec![
            spread("POS", dec!(0.003), dec!(0.0), None),
            spread("NEG", dec!(-0.002), dec!(0.0), None),
        ];
        let picks = Strategy::RegimeAdaptive.candidates(&StrategyParams::default(), &spreads);
        assert_eq!(picks[0].spread.asset, "POS");
        assert_eq!(picks[0].side, PositionSide::ShortPerp);
    }

    #[test]
    fn exit_rules_per_strategy() {
        let params = StrategyParams::default();

        // negative_fade exits once the rate recovers above -0.01
        let recovering = spread("AAA", dec!(-0.005), dec!(0.0), None);
        assert!(Strategy::NegativeFade.should_exit(&params, &recovering, PositionSide::LongPerp));
        let still_deep = spread("AAA", dec!(-0.05), dec!(0.0), None);
        assert!(!Strategy::NegativeFade.should_exit(&params, &still_deep, PositionSide::LongPerp));

        // spread strategies exit when the spread compresses
        let compressed = spread("BBB", dec!(0.001), dec!(0.005), None);
        assert!(Strategy::Aggressive.should_exit(&params, &compressed, PositionSide::ShortPerp));
        let wide = spread("BBB", dec!(0.001), dec!(0.05), None);
        assert!(!Strategy::Aggressive.should_exit(&params, &wide, PositionSide::ShortPerp));

        // regime_adaptive is side-aware
        let positive = spread("CCC", dec!(0.0005), dec!(0.0), None);
        assert!(Strategy::RegimeAdaptive.should_exit(&params, &positive, PositionSide::LongPerp));
        assert!(!Strategy::RegimeAdaptive.should_exit(&params, &positive, PositionSide::ShortPerp));
        let negative = spread("CCC", dec!(-0.0005), dec!(0.0), None);
        assert!(Strategy::RegimeAdaptive.should_exit(&params, &negative, PositionSide::ShortPerp));
        assert!(!Strategy::RegimeAdaptive.should_exit(&params, &negative, PositionSide::LongPerp));
    }
}
