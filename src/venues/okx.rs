//! OKX swap adapter.
//!
//! OKX has no bulk funding endpoint: one call lists the SWAP instruments,
//! then the funding rate is fetched per instrument in concurrent batches of
//! 20. A failing instrument is skipped rather than failing the venue.

use super::{http_client, parse_decimal, VenueAdapter};
use crate::error::{DeskError, Result};
use crate::types::{FundingRate, Venue};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://www.okx.com";
const BATCH_SIZE: usize = 20;
const USDT_SWAP_SUFFIX: &str = "-USDT-SWAP";

pub struct OkxAdapter {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OkxResponse<T> {
    code: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    inst_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentFunding {
    funding_rate: String,
    #[serde(default)]
    next_funding_time: String,
}

impl OkxAdapter {
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

    /// `BTC-USDT-SWAP` -> `BTC`.
    fn canonical_asset(inst_id: &str) -> String {
        inst_id.trim_end_matches(USDT_SWAP_SUFFIX).to_uppercase()
    }

    async fn list_usdt_swaps(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/v5/public/instruments", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("instType", "SWAP")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(DeskError::venue("okx", format!("status {}", resp.status())));
        }

        let body: OkxResponse<Instrument> = resp.json().await?;
        if body.code != "0" {
            return Err(DeskError::venue("okx", format!("code {}", body.code)));
        }

        Ok(body
            .data
            .into_iter()
            .map(|i| i.inst_id)
            .filter(|id| id.ends_with(USDT_SWAP_SUFFIX))
            .collect())
    }

    async fn fetch_instrument(&self, inst_id: &str) -> Result<FundingRate> {
        let url = format!("{}/api/v5/public/funding-rate", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("instId", inst_id)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(DeskError::venue("okx", format!("{inst_id}: status {}", resp.status())));
        }

        let body: OkxResponse<InstrumentFunding> = resp.json().await?;
        let entry = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| DeskError::venue("okx", format!("{inst_id}: empty funding payload")))?;

        let rate_raw = parse_decimal(&entry.funding_rate)
            .ok_or_else(|| DeskError::venue("okx", format!("{inst_id}: bad rate")))?;

        Ok(FundingRate {
            asset: Self::canonical_asset(inst_id),
            venue: Venue::Okx,
            rate_8h: rate_raw,
            rate_raw,
            next_funding_time: entry
                .next_funding_time
                .parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            open_interest: None,
            mark_price: None,
            change_24h: None,
            volume_24h: None,
            observed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl VenueAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    async fn fetch(&self) -> Result<Vec<FundingRate>> {
        let instruments = self.list_usdt_swaps().await?;
        let mut rates = Vec::with_capacity(instruments.len());

        for batch in instruments.chunks(BATCH_SIZE) {
            let results = join_all(batch.iter().map(|id| self.fetch_instrument(id))).await;
            for (inst_id, result) in batch.iter().zip(results) {
                match result {
                    Ok(rate) => rates.push(rate),
                    Err(e) => debug!(instrument = %inst_id, error = %e, "okx instrument skipped"),
                }
            }
        }

        debug!(count = rates.len(), "okx funding fetched");
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_asset_strips_swap_suffix() {
        assert_eq!(OkxAdapter::canonical_asset("BTC-USDT-SWAP"), "BTC");
        assert_eq!(OkxAdapter::canonical_asset("1INCH-USDT-SWAP"), "1INCH");
    }

    #[test]
    fn funding_payload_parses() {
        let body: OkxResponse<InstrumentFunding> = serde_json::from_str(
            r#"{"code": "0", "data": [
                {"fundingRate": "0.0000482", "nextFundingTime": "1700000000000", "fundingTime": "1699971200000"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(body.code, "0");
        assert_eq!(body.data.len(), 1);
        assert_eq!(parse_decimal(&body.data[0].funding_rate), Some(rust_decimal_macros::dec!(0.0000482)));
    }

    #[test]
    fn instruments_filter_to_usdt_swaps() {
        let body: OkxResponse<Instrument> = serde_json::from_str(
            r#"{"code": "0", "data": [
                {"instId": "BTC-USDT-SWAP"},
                {"instId": "BTC-USD-SWAP"},
                {"instId": "ETH-USDT-SWAP"}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<String> = body
            .data
            .into_iter()
            .map(|i| i.inst_id)
            .filter(|id| id.ends_with(USDT_SWAP_SUFFIX))
            .collect();
        assert_eq!(ids, vec!["BTC-USDT-SWAP", "ETH-USDT-SWAP"]);
    }
}
