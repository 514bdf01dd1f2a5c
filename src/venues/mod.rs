//! Venue adapters.
//!
//! One adapter per venue behind a uniform trait: fetch the venue's funding
//! endpoint(s), filter to USDT-margined perpetuals, strip the venue's symbol
//! suffix, and normalize the native rate to an 8-hour equivalent. Adapters
//! are stateless; `observed_at` is stamped when the adapter returns.

mod binance;
mod bybit;
mod hyperliquid;
mod okx;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use hyperliquid::HyperliquidAdapter;
pub use okx::OkxAdapter;

use crate::error::Result;
use crate::types::{FundingRate, Venue};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

/// Uniform fetch contract the aggregator depends on.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Fetch and normalize the venue's current funding snapshot. Fails with a
    /// transport error on non-success status or unparseable payload.
    async fn fetch(&self) -> Result<Vec<FundingRate>>;
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Venue payloads carry numbers as strings; unparseable fields skip the row.
pub(crate) fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok()
}
