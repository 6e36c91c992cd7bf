use serde::Deserialize;
use serde_json::Value;

use crate::{
    schema::{Interval, KlineRow, SpotListing},
    util,
};

use super::adapter::{ExchangeAdapter, KlineQuery, check_range, value_i64, value_str};
use super::http::{RestClient, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.kucoin.com";

/// KuCoin spot REST adapter
///
/// Endpoints:
/// - GET /api/v1/market/candles
/// - GET /api/v2/symbols
///
/// QUIRKS:
/// - Range is given in SECONDS (`startAt` / `endAt`)
/// - No limit parameter; the collector truncates
/// - Row layout is [time, open, CLOSE, HIGH, LOW, volume, turnover]
/// - Success is `code == "200000"`
pub struct KucoinAdapter {
    http: RestClient,
}

impl KucoinAdapter {
    pub fn new(base_url: &str, retry: RetryPolicy) -> anyhow::Result<Self> {
        Ok(Self { http: RestClient::new(base_url, retry)? })
    }
}

pub fn kucoin_type(interval: Interval) -> &'static str {
    match interval {
        Interval::M1 => "1min",
        Interval::M5 => "5min",
        Interval::M15 => "15min",
        Interval::M30 => "30min",
        Interval::H1 => "1hour",
        Interval::H4 => "4hour",
        Interval::D1 => "1day",
        Interval::W1 => "1week",
        Interval::Month1 => "1month",
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> anyhow::Result<T> {
        if self.code != "200000" {
            anyhow::bail!(
                "kucoin code {}: {}",
                self.code,
                self.msg.unwrap_or_default()
            );
        }
        self.data
            .ok_or_else(|| anyhow::anyhow!("kucoin response without data"))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    base_currency: String,
    quote_currency: String,
    enable_trading: bool,
}

fn parse_kline(row: &[Value], interval: Interval) -> Option<KlineRow> {
    let open_time = value_i64(row, 0)? * 1000;
    Some(KlineRow {
        trading_pair_id: 0,
        open_time,
        open: value_str(row, 1)?,
        close: value_str(row, 2)?,
        high: value_str(row, 3)?,
        low: value_str(row, 4)?,
        volume: value_str(row, 5)?,
        close_time: interval.close_time(open_time),
    })
}

#[async_trait::async_trait]
impl ExchangeAdapter for KucoinAdapter {

    fn name(&self) -> &'static str {
        "kucoin"
    }

    async fn fetch_klines(
        &self,
        base: &str,
        quote: &str,
        query: &KlineQuery,
    ) -> anyhow::Result<Vec<KlineRow>> {
        check_range(query)?;

        let params = [
            ("type", kucoin_type(query.interval).to_string()),
            ("symbol", util::symbol_to_exchange(self.name(), base, quote)),
            ("startAt", (query.start_time / 1000).to_string()),
            ("endAt", (query.end_time / 1000).to_string()),
        ];

        let envelope: Envelope<Vec<Vec<Value>>> =
            self.http.get_json("/api/v1/market/candles", &params).await?;

        Ok(envelope
            .into_data()?
            .iter()
            .filter_map(|r| parse_kline(r, query.interval))
            .collect())
    }

    async fn list_spot_coins(&self) -> anyhow::Result<Vec<SpotListing>> {
        let envelope: Envelope<Vec<SymbolInfo>> =
            self.http.get_json("/api/v2/symbols", &[]).await?;

        Ok(envelope
            .into_data()?
            .into_iter()
            .filter(|s| s.enable_trading)
            .map(|s| SpotListing {
                exchange: self.name().to_string(),
                base: s.base_currency.to_uppercase(),
                quote: s.quote_currency.to_uppercase(),
            })
            .collect())
    }
}
