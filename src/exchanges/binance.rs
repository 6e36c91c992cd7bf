use serde::Deserialize;
use serde_json::Value;

use crate::{
    schema::{Interval, KlineRow, SpotListing},
    util,
};

use super::adapter::{ExchangeAdapter, KlineQuery, check_range, value_i64, value_str};
use super::http::{RestClient, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Binance rejects larger pages.
const MAX_LIMIT: usize = 1000;

/// Binance (Global) spot REST adapter
///
/// Endpoints:
/// - GET /api/v3/klines
/// - GET /api/v3/exchangeInfo
///
/// https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints
pub struct BinanceAdapter {
    http: RestClient,
}

impl BinanceAdapter {
    pub fn new(base_url: &str, retry: RetryPolicy) -> anyhow::Result<Self> {
        Ok(Self { http: RestClient::new(base_url, retry)? })
    }
}

pub fn binance_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::M1 => "1m",
        Interval::M5 => "5m",
        Interval::M15 => "15m",
        Interval::M30 => "30m",
        Interval::H1 => "1h",
        Interval::H4 => "4h",
        Interval::D1 => "1d",
        Interval::W1 => "1w",
        Interval::Month1 => "1M",
    }
}

/// Binance kline layout:
/// [open_time, open, high, low, close, volume, close_time, ...]
fn parse_kline(row: &[Value]) -> Option<KlineRow> {
    Some(KlineRow {
        trading_pair_id: 0,
        open_time: value_i64(row, 0)?,
        open: value_str(row, 1)?,
        high: value_str(row, 2)?,
        low: value_str(row, 3)?,
        close: value_str(row, 4)?,
        volume: value_str(row, 5)?,
        close_time: value_i64(row, 6)?,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    status: String,
    base_asset: String,
    quote_asset: String,
}

#[async_trait::async_trait]
impl ExchangeAdapter for BinanceAdapter {

    fn name(&self) -> &'static str {
        "binance"
    }

    async fn fetch_klines(
        &self,
        base: &str,
        quote: &str,
        query: &KlineQuery,
    ) -> anyhow::Result<Vec<KlineRow>> {
        check_range(query)?;

        let params = [
            ("symbol", util::symbol_to_exchange(self.name(), base, quote)),
            ("interval", binance_interval(query.interval).to_string()),
            ("startTime", query.start_time.to_string()),
            ("endTime", query.end_time.to_string()),
            ("limit", query.limit.min(MAX_LIMIT).to_string()),
        ];

        let raw: Vec<Vec<Value>> = self.http.get_json("/api/v3/klines", &params).await?;

        Ok(raw.iter().filter_map(|r| parse_kline(r)).collect())
    }

    async fn list_spot_coins(&self) -> anyhow::Result<Vec<SpotListing>> {
        let info: ExchangeInfo = self.http.get_json("/api/v3/exchangeInfo", &[]).await?;

        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| SpotListing {
                exchange: self.name().to_string(),
                base: s.base_asset.to_uppercase(),
                quote: s.quote_asset.to_uppercase(),
            })
            .collect())
    }
}
