use serde::Deserialize;
use serde_json::Value;

use crate::{
    schema::{Interval, KlineRow, SpotListing},
    util,
};

use super::adapter::{ExchangeAdapter, KlineQuery, check_range, value_i64, value_str};
use super::http::{RestClient, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.gateio.ws";

/// Points per candlestick request.
const MAX_POINTS: usize = 1000;

/// Gate.io v4 spot REST adapter
///
/// This adapter encapsulates all Gate.io specific REST behavior:
/// - market id format (BASE_QUOTE)
/// - interval codes (weeks and months are `7d` / `30d`)
/// - candlestick column order
///
/// QUIRKS:
/// - `limit` conflicts with `from`/`to` and gets the request
///   rejected, so only the range is sent
/// - Times are in SECONDS
/// - A range spanning more than 1000 buckets is rejected, so `from`
///   is pulled forward to keep at most `limit` buckets before `to`
/// - Row layout is
///   [t, quote_volume, close, high, low, open, base_volume, closed]
pub struct GateIoAdapter {
    http: RestClient,
}

impl GateIoAdapter {
    pub fn new(base_url: &str, retry: RetryPolicy) -> anyhow::Result<Self> {
        Ok(Self { http: RestClient::new(base_url, retry)? })
    }
}

pub fn gateio_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::M1 => "1m",
        Interval::M5 => "5m",
        Interval::M15 => "15m",
        Interval::M30 => "30m",
        Interval::H1 => "1h",
        Interval::H4 => "4h",
        Interval::D1 => "1d",
        Interval::W1 => "7d",
        Interval::Month1 => "30d",
    }
}

#[derive(Deserialize)]
struct CurrencyPair {
    base: String,
    quote: String,
    trade_status: String,
}

fn parse_kline(row: &[Value], interval: Interval) -> Option<KlineRow> {
    let open_time = value_i64(row, 0)? * 1000;
    Some(KlineRow {
        trading_pair_id: 0,
        open_time,
        close: value_str(row, 2)?,
        high: value_str(row, 3)?,
        low: value_str(row, 4)?,
        open: value_str(row, 5)?,
        volume: value_str(row, 6)?,
        close_time: interval.close_time(open_time),
    })
}

#[async_trait::async_trait]
impl ExchangeAdapter for GateIoAdapter {

    /// CONTRACT:
    /// - Must match `exchanges[].name` in config.json
    /// - Must match the key used in util::symbol_to_exchange
    fn name(&self) -> &'static str {
        "gateio"
    }

    async fn fetch_klines(
        &self,
        base: &str,
        quote: &str,
        query: &KlineQuery,
    ) -> anyhow::Result<Vec<KlineRow>> {
        check_range(query)?;

        let points = query.limit.clamp(1, MAX_POINTS) as i64;
        let from = query
            .start_time
            .max(query.end_time - (points - 1) * query.interval.duration_ms());

        let params = [
            ("currency_pair", util::symbol_to_exchange(self.name(), base, quote)),
            ("interval", gateio_interval(query.interval).to_string()),
            ("from", (from / 1000).to_string()),
            ("to", (query.end_time / 1000).to_string()),
        ];

        let raw: Vec<Vec<Value>> = self
            .http
            .get_json("/api/v4/spot/candlesticks", &params)
            .await?;

        Ok(raw
            .iter()
            .filter_map(|r| parse_kline(r, query.interval))
            .collect())
    }

    async fn list_spot_coins(&self) -> anyhow::Result<Vec<SpotListing>> {
        let pairs: Vec<CurrencyPair> = self
            .http
            .get_json("/api/v4/spot/currency_pairs", &[])
            .await?;

        Ok(pairs
            .into_iter()
            .filter(|p| p.trade_status == "tradable")
            .map(|p| SpotListing {
                exchange: self.name().to_string(),
                base: p.base.to_uppercase(),
                quote: p.quote.to_uppercase(),
            })
            .collect())
    }
}
