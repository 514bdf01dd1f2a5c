//! Hyperliquid adapter — the primary venue.
//!
//! One POST to the `info` endpoint returns asset metadata and per-asset
//! contexts in lockstep. Hyperliquid publishes a per-hour funding rate, so
//! the 8-hour normalization multiplies by 8. This is the only venue that
//! enriches rates with mark price, 24h change, volume, and open interest.

use super::{http_client, parse_decimal, VenueAdapter};
use crate::error::{DeskError, Result};
use crate::types::{FundingRate, Venue};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.hyperliquid.xyz";

pub struct HyperliquidAdapter {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Meta {
    universe: Vec<AssetMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetMeta {
    name: String,
    #[serde(default)]
    is_delisted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetCtx {
    funding: String,
    open_interest: String,
    mark_px: String,
    prev_day_px: String,
    day_ntl_vlm: String,
    #[serde(default)]
    next_funding_time: Option<i64>,
}

impl HyperliquidAdapter {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout_secs)?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn build_rates(meta: Meta, ctxs: Vec<AssetCtx>, observed_at: DateTime<Utc>) -> Vec<FundingRate> {
        meta.universe
            .into_iter()
            .zip(ctxs)
            .filter(|(asset, _)| !asset.is_delisted)
            .filter_map(|(asset, ctx)| {
                let rate_raw = parse_decimal(&ctx.funding)?;
                let mark = parse_decimal(&ctx.mark_px);
                let prev_day = parse_decimal(&ctx.prev_day_px);
                let change_24h = match (mark, prev_day) {
                    (Some(mark), Some(prev)) if !prev.is_zero() => {
                        Some((mark - prev) / prev * dec!(100))
                    }
                    _ => None,
                };
                // openInterest is denominated in the base asset; convert to USD.
                let open_interest = match (parse_decimal(&ctx.open_interest), mark) {
                    (Some(oi), Some(mark)) => Some(oi * mark),
                    _ => None,
                };
                Some(FundingRate {
                    asset: asset.name.to_uppercase(),
                    venue: Venue::Hyperliquid,
                    rate_8h: rate_raw * Decimal::from(8),
                    rate_raw,
                    next_funding_time: ctx
                        .next_funding_time
                        .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                    open_interest,
                    mark_price: mark,
                    change_24h,
                    volume_24h: parse_decimal(&ctx.day_ntl_vlm),
                    observed_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VenueAdapter for HyperliquidAdapter {
    fn venue(&self) -> Venue {
        Venue::Hyperliquid
    }

    async fn fetch(&self) -> Result<Vec<FundingRate>> {
        let url = format!("{}/info", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&json!({"type": "metaAndAssetCtxs"}))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(DeskError::venue(
                "hyperliquid",
                format!("status {}", resp.status()),
            ));
        }

        let (meta, ctxs): (Meta, Vec<AssetCtx>) = resp.json().await?;
        let rates = Self::build_rates(meta, ctxs, Utc::now());
        debug!(count = rates.len(), "hyperliquid funding fetched");
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> (Meta, Vec<AssetCtx>) {
        serde_json::from_str(
            r#"[
                {"universe": [
                    {"name": "BTC"},
                    {"name": "ETH"},
                    {"name": "OLD", "isDelisted": true}
                ]},
                [
                    {"funding": "0.00005", "openInterest": "1200.5", "markPx": "65000",
                     "prevDayPx": "64000", "dayNtlVlm": "1500000000", "nextFundingTime": 1700003600000},
                    {"funding": "-0.0000125", "openInterest": "9000", "markPx": "3200",
                     "prevDayPx": "3300", "dayNtlVlm": "800000000"},
                    {"funding": "0.0001", "openInterest": "10", "markPx": "1",
                     "prevDayPx": "1", "dayNtlVlm": "0"}
                ]
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn per_hour_rate_normalizes_to_8h() {
        let (meta, ctxs) = sample_payload();
        let rates = HyperliquidAdapter::build_rates(meta, ctxs, Utc::now());

        let btc = rates.iter().find(|r| r.asset == "BTC").unwrap();
        assert_eq!(btc.rate_raw, dec!(0.00005));
        assert_eq!(btc.rate_8h, dec!(0.0004));
    }

    #[test]
    fn delisted_assets_are_skipped() {
        let (meta, ctxs) = sample_payload();
        let rates = HyperliquidAdapter::build_rates(meta, ctxs, Utc::now());

        assert_eq!(rates.len(), 2);
        assert!(rates.iter().all(|r| r.asset != "OLD"));
    }

    #[test]
    fn enrichment_fields_populated() {
        let (meta, ctxs) = sample_payload();
        let rates = HyperliquidAdapter::build_rates(meta, ctxs, Utc::now());

        let btc = rates.iter().find(|r| r.asset == "BTC").unwrap();
        assert_eq!(btc.mark_price, Some(dec!(65000)));
        // 1200.5 coins at $65k
        assert_eq!(btc.open_interest, Some(dec!(78032500)));
        assert_eq!(btc.change_24h, Some(dec!(1.5625)));
        assert_eq!(btc.volume_24h, Some(dec!(1500000000)));
        assert!(btc.next_funding_time.is_some());

        let eth = rates.iter().find(|r| r.asset == "ETH").unwrap();
        assert!(eth.next_funding_time.is_none());
        assert!(eth.change_24h.unwrap() < Decimal::ZERO);
    }
}
