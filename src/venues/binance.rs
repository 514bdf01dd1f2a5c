//! Binance USDⓈ-M futures adapter.
//!
//! The premium-index endpoint returns every contract in one call with the
//! funding rate already quoted per 8 hours. Dated futures carry an underscore
//! suffix (`BTCUSDT_231229`) and are excluded.

use super::{http_client, parse_decimal, VenueAdapter};
use crate::error::{DeskError, Result};
use crate::types::{FundingRate, Venue};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

pub struct BinanceAdapter {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndexEntry {
    symbol: String,
    last_funding_rate: String,
    next_funding_time: i64,
    mark_price: String,
}

impl BinanceAdapter {
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

    fn build_rates(entries: Vec<PremiumIndexEntry>, observed_at: DateTime<Utc>) -> Vec<FundingRate> {
        entries
            .into_iter()
            .filter(|e| e.symbol.ends_with("USDT") && !e.symbol.contains('_'))
            .filter_map(|e| {
                let rate_raw = parse_decimal(&e.last_funding_rate)?;
                let asset = e.symbol.trim_end_matches("USDT").to_uppercase();
                Some(FundingRate {
                    asset,
                    venue: Venue::Binance,
                    rate_8h: rate_raw,
                    rate_raw,
                    next_funding_time: Utc.timestamp_millis_opt(e.next_funding_time).single(),
                    open_interest: None,
                    mark_price: parse_decimal(&e.mark_price),
                    change_24h: None,
                    volume_24h: None,
                    observed_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn fetch(&self) -> Result<Vec<FundingRate>> {
        let url = format!("{}/fapi/v1/premiumIndex", self.base_url);
        let resp = self.http.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(DeskError::venue(
                "binance",
                format!("status {}", resp.status()),
            ));
        }

        let entries: Vec<PremiumIndexEntry> = resp.json().await?;
        let rates = Self::build_rates(entries, Utc::now());
        debug!(count = rates.len(), "binance funding fetched");
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_entries() -> Vec<PremiumIndexEntry> {
        serde_json::from_str(
            r#"[
                {"symbol": "BTCUSDT", "lastFundingRate": "0.00010000",
                 "nextFundingTime": 1700000000000, "markPrice": "65000.10"},
                {"symbol": "BTCUSDT_231229", "lastFundingRate": "0",
                 "nextFundingTime": 0, "markPrice": "65500"},
                {"symbol": "ETHBUSD", "lastFundingRate": "0.0001",
                 "nextFundingTime": 1700000000000, "markPrice": "3200"},
                {"symbol": "DOGEUSDT", "lastFundingRate": "-0.00025000",
                 "nextFundingTime": 1700000000000, "markPrice": "0.081"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn filters_to_usdt_perps() {
        let rates = BinanceAdapter::build_rates(sample_entries(), Utc::now());
        let assets: Vec<&str> = rates.iter().map(|r| r.asset.as_str()).collect();
        assert_eq!(assets, vec!["BTC", "DOGE"]);
    }

    #[test]
    fn rate_is_already_per_8h() {
        let rates = BinanceAdapter::build_rates(sample_entries(), Utc::now());
        let btc = &rates[0];
        assert_eq!(btc.rate_raw, dec!(0.00010000));
        assert_eq!(btc.rate_8h, btc.rate_raw);

        let doge = &rates[1];
        assert_eq!(doge.rate_8h, dec!(-0.00025000));
    }
}
