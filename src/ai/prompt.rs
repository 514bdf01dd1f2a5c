//! Prompt assembly for the AI trader cycle.
//!
//! The system prompt carries the agent's persona; the user prompt carries a
//! top-20-by-open-interest market table and a portfolio summary. The model is
//! asked for a single JSON object and nothing else.

use crate::types::{AggregatedResult, AiPosition, AiTrader, FundingSpread, AI_BASELINE_USD};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Assets shown to the model, ranked by primary open interest.
const CONTEXT_ASSETS: usize = 20;

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{"action": "open_long" | "open_short" | "close" | "hold", "asset": "<TICKER or omit>", "size_usd": <number or omit>, "reasoning": "<one or two sentences>"}"#;

/// Persona-specific system prompt, keyed by agent name with a generic
/// fallback for unrecognized agents.
pub fn persona_prompt(trader: &AiTrader) -> String {
    let style = match trader.name.to_lowercase().as_str() {
        "atlas" => {
            "You build a macro thesis before anything else: funding regimes, \
             crowd positioning, and where the cross-venue spread says leverage \
             is concentrated. You act only when the macro picture and the \
             funding picture agree, and you size with conviction when they do."
        }
        "blaze" => {
            "You are a momentum and breakout trader. You chase assets where \
             funding is accelerating and price has 24h strength behind it. You \
             would rather be early and wrong than late and right, but you cut \
             losers without hesitation."
        }
        "sage" => {
            "You are a contrarian mean-reversion trader. Extreme funding is a \
             crowd leaning one way; you look to fade it when spreads are \
             stretched beyond what carry justifies. Patience first: most \
             cycles the right move is to wait."
        }
        "vector" => {
            "You are a risk-adjusted conviction trader. Every idea competes \
             for capital on expected funding carry per unit of price risk. You \
             prefer fewer, better positions and will hold cash when nothing \
             clears the bar."
        }
        _ => {
            "You are a disciplined perpetual-futures funding trader. You weigh \
             funding carry against price risk and act only on clear edges."
        }
    };

    format!(
        "You are {name} {emoji}, an autonomous crypto trading agent. {style}\n\
         {persona}\n\
         You manage a simulated account trading perpetual futures on Hyperliquid. \
         Longs pay shorts when funding is positive. You may hold at most 3 \
         positions, one per asset.\n\n{format}",
        name = trader.name,
        emoji = trader.emoji,
        style = style,
        persona = trader.persona,
        format = RESPONSE_FORMAT,
    )
}

/// Market table for the user prompt: one line per asset.
pub fn market_context(agg: &AggregatedResult) -> String {
    let mut spreads: Vec<&FundingSpread> = agg.spreads.iter().collect();
    spreads.sort_by(|a, b| {
        b.primary
            .open_interest
            .unwrap_or(Decimal::ZERO)
            .cmp(&a.primary.open_interest.unwrap_or(Decimal::ZERO))
    });

    let mut out = String::from(
        "Top assets by open interest (rates are per 8h, funding paid hourly):\n",
    );
    for spread in spreads.iter().take(CONTEXT_ASSETS) {
        let primary = &spread.primary;
        let mark = primary
            .mark_price
            .map(|p| format!("${p:.4}"))
            .unwrap_or_else(|| "n/a".to_string());
        let change = primary
            .change_24h
            .map(|c| format!("{c:.2}%"))
            .unwrap_or_else(|| "n/a".to_string());
        let volume = primary
            .volume_24h
            .map(|v| format!("${:.1}M", v / dec!(1000000)))
            .unwrap_or_else(|| "n/a".to_string());
        let oi = primary
            .open_interest
            .map(|o| format!("${:.1}M", o / dec!(1000000)))
            .unwrap_or_else(|| "n/a".to_string());
        let cex_avg = cex_average(spread)
            .map(|r| format!("{:.4}%", r * dec!(100)))
            .unwrap_or_else(|| "n/a".to_string());

        out.push_str(&format!(
            "{}: mark {} | 24h {} | vol {} | OI {} | HL rate {:.4}% | CEX avg {} | spread {:.4}%\n",
            spread.asset,
            mark,
            change,
            volume,
            oi,
            primary.rate_8h * dec!(100),
            cex_avg,
            spread.max_spread * dec!(100),
        ));
    }
    out
}

fn cex_average(spread: &FundingSpread) -> Option<Decimal> {
    if spread.cex.is_empty() {
        return None;
    }
    let sum: Decimal = spread.cex.values().map(|r| r.rate_8h).sum();
    Some(sum / Decimal::from(spread.cex.len() as u32))
}

/// Portfolio summary for the user prompt.
pub fn portfolio_context(
    cash: Decimal,
    positions: &[AiPosition],
    agg: &AggregatedResult,
) -> String {
    let mut unrealized = Decimal::ZERO;
    let mut lines = String::new();

    for position in positions {
        let spread = agg.spread_for(&position.asset);
        let mark = spread.and_then(|s| s.primary.mark_price);
        let rate = spread.map(|s| s.primary.rate_8h).unwrap_or(Decimal::ZERO);
        let pnl = mark
            .map(|m| position.unrealized_pnl(m))
            .unwrap_or(Decimal::ZERO);
        unrealized += pnl;

        let mark_text = mark
            .map(|m| format!("{m:.4}"))
            .unwrap_or_else(|| "n/a".to_string());
        lines.push_str(&format!(
            "- {} {} ${:.0}: entry {:.4}, mark {}, unrealized {:.2}, funding {:.2}, current rate {:.4}%\n",
            position.asset,
            position.direction,
            position.size_usd,
            position.entry_price,
            mark_text,
            pnl,
            position.funding_collected,
            rate * dec!(100),
        ));
    }

    let notional: Decimal = positions.iter().map(|p| p.size_usd).sum();
    let total_value = cash + notional + unrealized;
    let pnl_total = total_value - AI_BASELINE_USD;

    let mut out = format!(
        "Your portfolio:\ncash ${cash:.2}, total value ${total_value:.2}, P&L vs ${AI_BASELINE_USD} baseline: {pnl_total:.2}\n",
    );
    if positions.is_empty() {
        out.push_str("no open positions\n");
    } else {
        out.push_str(&lines);
    }
    out.push_str("\nWhat is your one action for this cycle?");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FundingRate, TradeDirection, Venue};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn spread(asset: &str, rate_8h: Decimal, oi: Decimal) -> FundingSpread {
        let primary = FundingRate {
            asset: asset.to_string(),
            venue: Venue::Hyperliquid,
            rate_8h,
            rate_raw: rate_8h,
            next_funding_time: None,
            open_interest: Some(oi),
            mark_price: Some(dec!(100)),
            change_24h: Some(dec!(1.2)),
            volume_24h: Some(dec!(5000000)),
            observed_at: Utc::now(),
        };
        let mut cex = BTreeMap::new();
        cex.insert(
            Venue::Binance,
            FundingRate {
                venue: Venue::Binance,
                ..primary.clone()
            },
        );
        FundingSpread {
            asset: asset.to_string(),
            primary,
            cex,
            best_cex: Some(Venue::Binance),
            best_cex_rate: Some(rate_8h),
            max_spread: Decimal::ZERO,
        }
    }

    fn trader(name: &str) -> AiTrader {
        AiTrader {
            id: "t-1".to_string(),
            name: name.to_string(),
            model: "deepseek/deepseek-chat".to_string(),
            emoji: "🤖".to_string(),
            persona: "Keeps a cool head.".to_string(),
            cash_balance: dec!(10000),
            is_active: true,
        }
    }

    #[test]
    fn market_context_caps_at_twenty_lines() {
        let spreads: Vec<FundingSpread> = (0..30)
            .map(|i| spread(&format!("A{i}"), dec!(0.0001), Decimal::from(1000 - i)))
            .collect();
        let agg = AggregatedResult {
            spreads,
            all_rates: Vec::new(),
            timestamp: Utc::now(),
        };

        let context = market_context(&agg);
        // header + 20 asset lines
        assert_eq!(context.lines().count(), 21);
    }

    #[test]
    fn market_context_ranks_by_open_interest() {
        let agg = AggregatedResult {
            spreads: vec![
                spread("SMALL", dec!(0.0001), dec!(10)),
                spread("BIG", dec!(0.0001), dec!(1000)),
            ],
            all_rates: Vec::new(),
            timestamp: Utc::now(),
        };

        let context = market_context(&agg);
        let big = context.find("BIG").unwrap();
        let small = context.find("SMALL").unwrap();
        assert!(big < small);
    }

    #[test]
    fn personas_differ_by_name_with_fallback() {
        let atlas = persona_prompt(&trader("Atlas"));
        let blaze = persona_prompt(&trader("Blaze"));
        let other = persona_prompt(&trader("Quant"));

        assert!(atlas.contains("macro thesis"));
        assert!(blaze.contains("momentum"));
        assert!(other.contains("disciplined"));
        for prompt in [&atlas, &blaze, &other] {
            assert!(prompt.contains("single JSON object"));
        }
    }

    #[test]
    fn portfolio_context_reports_baseline_pnl() {
        let agg = AggregatedResult {
            spreads: vec![spread("BTC", dec!(0.0004), dec!(1000))],
            all_rates: Vec::new(),
            timestamp: Utc::now(),
        };
        let position = AiPosition {
            id: "p-1".to_string(),
            trader_id: "t-1".to_string(),
            asset: "BTC".to_string(),
            direction: TradeDirection::Long,
            size_usd: dec!(2000),
            entry_price: dec!(80),
            entry_rate_8h: dec!(0.0004),
            funding_collected: dec!(1.5),
            last_funding_at: Utc::now(),
            opened_at: Utc::now(),
            is_open: true,
            exit_price: None,
            realized_pnl: None,
            closed_at: None,
        };

        let context = portfolio_context(dec!(8000), &[position], &agg);
        // long from 80 marked 100: +25% on 2000 = +500; total 8000+2000+500
        assert!(context.contains("total value $10500.00"));
        assert!(context.contains("BTC long"));
    }
}
