//! Bybit linear-perpetuals adapter.
//!
//! The v5 tickers endpoint covers all linear contracts in one call, rate
//! quoted per 8 hours. Open interest comes back already denominated in USD
//! (`openInterestValue`), and the 24h change as a fraction.

use super::{http_client, parse_decimal, VenueAdapter};
use crate::error::{DeskError, Result};
use crate::types::{FundingRate, Venue};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.bybit.com";

pub struct BybitAdapter {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickersResponse {
    ret_code: i64,
    ret_msg: String,
    result: TickersResult,
}

#[derive(Debug, Deserialize)]
struct TickersResult {
    #[serde(default)]
    list: Vec<Ticker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    symbol: String,
    #[serde(default)]
    funding_rate: String,
    #[serde(default)]
    next_funding_time: String,
    #[serde(default)]
    mark_price: String,
    #[serde(default)]
    open_interest_value: String,
    #[serde(default)]
    turnover_24h: String,
    #[serde(default)]
    price_24h_pcnt: String,
}

impl BybitAdapter {
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

    fn build_rates(tickers: Vec<Ticker>, observed_at: DateTime<Utc>) -> Vec<FundingRate> {
        tickers
            .into_iter()
            .filter(|t| t.symbol.ends_with("USDT"))
            .filter_map(|t| {
                // Non-perpetual listings leave fundingRate empty.
                let rate_raw = parse_decimal(&t.funding_rate)?;
                let asset = t.symbol.trim_end_matches("USDT").to_uppercase();
                Some(FundingRate {
                    asset,
                    venue: Venue::Bybit,
                    rate_8h: rate_raw,
                    rate_raw,
                    next_funding_time: t
                        .next_funding_time
                        .parse::<i64>()
                        .ok()
                        .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                    open_interest: parse_decimal(&t.open_interest_value),
                    mark_price: parse_decimal(&t.mark_price),
                    change_24h: parse_decimal(&t.price_24h_pcnt).map(|p| p * dec!(100)),
                    volume_24h: parse_decimal(&t.turnover_24h),
                    observed_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VenueAdapter for BybitAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    async fn fetch(&self) -> Result<Vec<FundingRate>> {
        let url = format!("{}/v5/market/tickers", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("category", "linear")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(DeskError::venue(
                "bybit",
                format!("status {}", resp.status()),
            ));
        }

        let body: TickersResponse = resp.json().await?;
        if body.ret_code != 0 {
            return Err(DeskError::venue(
                "bybit",
                format!("retCode {}: {}", body.ret_code, body.ret_msg),
            ));
        }

        let rates = Self::build_rates(body.result.list, Utc::now());
        debug!(count = rates.len(), "bybit funding fetched");
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_tickers() -> Vec<Ticker> {
        serde_json::from_str(
            r#"[
                {"symbol": "BTCUSDT", "fundingRate": "0.0001", "nextFundingTime": "1700000000000",
                 "markPrice": "64999.5", "openInterestValue": "2500000000",
                 "turnover24h": "9000000000", "price24hPcnt": "0.0231"},
                {"symbol": "ETHUSD", "fundingRate": "0.0001", "nextFundingTime": "1700000000000",
                 "markPrice": "3200", "openInterestValue": "0", "turnover24h": "0", "price24hPcnt": "0"},
                {"symbol": "SOLUSDT", "fundingRate": "", "nextFundingTime": "",
                 "markPrice": "145.2", "openInterestValue": "", "turnover24h": "", "price24hPcnt": ""}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn keeps_usdt_perps_with_funding() {
        let rates = BybitAdapter::build_rates(sample_tickers(), Utc::now());
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].asset, "BTC");
    }

    #[test]
    fn change_is_converted_to_percent() {
        let rates = BybitAdapter::build_rates(sample_tickers(), Utc::now());
        assert_eq!(rates[0].change_24h, Some(dec!(2.31)));
        assert_eq!(rates[0].open_interest, Some(dec!(2500000000)));
    }
}
