use serde::Deserialize;
use serde_json::Value;

use crate::{
    schema::{Interval, KlineRow, SpotListing},
    util,
};

use super::adapter::{ExchangeAdapter, KlineQuery, check_range, value_i64, value_str};
use super::http::{RestClient, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://www.okx.com";

/// history-candles pages are capped at 100 rows.
const MAX_LIMIT: usize = 100;

/// OKX v5 spot REST adapter
///
/// Endpoints:
/// - GET /api/v5/market/history-candles
/// - GET /api/v5/public/instruments?instType=SPOT
///
/// QUIRKS:
/// - Range parameters are exclusive cursors: `after` returns rows
///   older than the timestamp, `before` rows newer than it.
/// - Daily and longer bars use the `utc` variants so buckets line
///   up with the other exchanges (plain `1D` is Hong Kong time).
/// - Rows come newest-first without close time.
pub struct OkxAdapter {
    http: RestClient,
}

impl OkxAdapter {
    pub fn new(base_url: &str, retry: RetryPolicy) -> anyhow::Result<Self> {
        Ok(Self { http: RestClient::new(base_url, retry)? })
    }
}

pub fn okx_bar(interval: Interval) -> &'static str {
    match interval {
        Interval::M1 => "1m",
        Interval::M5 => "5m",
        Interval::M15 => "15m",
        Interval::M30 => "30m",
        Interval::H1 => "1H",
        Interval::H4 => "4H",
        Interval::D1 => "1Dutc",
        Interval::W1 => "1Wutc",
        Interval::Month1 => "1Mutc",
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> anyhow::Result<Vec<T>> {
        if self.code != "0" {
            anyhow::bail!("okx code {}: {}", self.code, self.msg);
        }
        Ok(self.data)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    base_ccy: String,
    quote_ccy: String,
    state: String,
}

/// [ts, open, high, low, close, vol, volCcy, volCcyQuote, confirm]
fn parse_kline(row: &[Value], interval: Interval) -> Option<KlineRow> {
    let open_time = value_i64(row, 0)?;
    Some(KlineRow {
        trading_pair_id: 0,
        open_time,
        open: value_str(row, 1)?,
        high: value_str(row, 2)?,
        low: value_str(row, 3)?,
        close: value_str(row, 4)?,
        volume: value_str(row, 5)?,
        close_time: interval.close_time(open_time),
    })
}

#[async_trait::async_trait]
impl ExchangeAdapter for OkxAdapter {

    fn name(&self) -> &'static str {
        "okx"
    }

    async fn fetch_klines(
        &self,
        base: &str,
        quote: &str,
        query: &KlineQuery,
    ) -> anyhow::Result<Vec<KlineRow>> {
        check_range(query)?;

        let params = [
            ("instId", util::symbol_to_exchange(self.name(), base, quote)),
            ("bar", okx_bar(query.interval).to_string()),
            ("after", (query.end_time + 1).to_string()),
            ("before", (query.start_time - 1).to_string()),
            ("limit", query.limit.min(MAX_LIMIT).to_string()),
        ];

        let envelope: Envelope<Vec<Value>> = self
            .http
            .get_json("/api/v5/market/history-candles", &params)
            .await?;

        Ok(envelope
            .into_data()?
            .iter()
            .filter_map(|r| parse_kline(r, query.interval))
            .collect())
    }

    async fn list_spot_coins(&self) -> anyhow::Result<Vec<SpotListing>> {
        let envelope: Envelope<Instrument> = self
            .http
            .get_json("/api/v5/public/instruments", &[("instType", "SPOT".to_string())])
            .await?;

        Ok(envelope
            .into_data()?
            .into_iter()
            .filter(|i| i.state == "live")
            .map(|i| SpotListing {
                exchange: self.name().to_string(),
                base: i.base_ccy.to_uppercase(),
                quote: i.quote_ccy.to_uppercase(),
            })
            .collect())
    }
}
