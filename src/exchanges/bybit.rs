use serde::Deserialize;
use serde_json::Value;

use crate::{
    schema::{Interval, KlineRow, SpotListing},
    util,
};

use super::adapter::{ExchangeAdapter, KlineQuery, check_range, value_i64, value_str};
use super::http::{RestClient, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.bybit.com";

const MAX_LIMIT: usize = 1000;

/// Bybit v5 spot REST adapter
///
/// Endpoints:
/// - GET /v5/market/kline?category=spot
/// - GET /v5/market/instruments-info?category=spot
///
/// QUIRKS:
/// - Every response is wrapped in `{retCode, retMsg, result}`;
///   HTTP 200 with `retCode != 0` is an error.
/// - Klines come newest-first and carry no close time.
pub struct BybitAdapter {
    http: RestClient,
}

impl BybitAdapter {
    pub fn new(base_url: &str, retry: RetryPolicy) -> anyhow::Result<Self> {
        Ok(Self { http: RestClient::new(base_url, retry)? })
    }
}

pub fn bybit_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::M1 => "1",
        Interval::M5 => "5",
        Interval::M15 => "15",
        Interval::M30 => "30",
        Interval::H1 => "60",
        Interval::H4 => "240",
        Interval::D1 => "D",
        Interval::W1 => "W",
        Interval::Month1 => "M",
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    ret_msg: String,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> anyhow::Result<T> {
        if self.ret_code != 0 {
            anyhow::bail!("bybit retCode {}: {}", self.ret_code, self.ret_msg);
        }
        self.result
            .ok_or_else(|| anyhow::anyhow!("bybit response without result"))
    }
}

#[derive(Deserialize)]
struct KlineList {
    #[serde(default)]
    list: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    base_coin: String,
    quote_coin: String,
    status: String,
}

#[derive(Deserialize)]
struct InstrumentList {
    #[serde(default)]
    list: Vec<Instrument>,
}

/// [start_time, open, high, low, close, volume, turnover]
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
impl ExchangeAdapter for BybitAdapter {

    fn name(&self) -> &'static str {
        "bybit"
    }

    async fn fetch_klines(
        &self,
        base: &str,
        quote: &str,
        query: &KlineQuery,
    ) -> anyhow::Result<Vec<KlineRow>> {
        check_range(query)?;

        let params = [
            ("category", "spot".to_string()),
            ("symbol", util::symbol_to_exchange(self.name(), base, quote)),
            ("interval", bybit_interval(query.interval).to_string()),
            ("start", query.start_time.to_string()),
            ("end", query.end_time.to_string()),
            ("limit", query.limit.min(MAX_LIMIT).to_string()),
        ];

        let envelope: Envelope<KlineList> =
            self.http.get_json("/v5/market/kline", &params).await?;

        Ok(envelope
            .into_result()?
            .list
            .iter()
            .filter_map(|r| parse_kline(r, query.interval))
            .collect())
    }

    async fn list_spot_coins(&self) -> anyhow::Result<Vec<SpotListing>> {
        let envelope: Envelope<InstrumentList> = self
            .http
            .get_json("/v5/market/instruments-info", &[("category", "spot".to_string())])
            .await?;

        Ok(envelope
            .into_result()?
            .list
            .into_iter()
            .filter(|i| i.status == "Trading")
            .map(|i| SpotListing {
                exchange: self.name().to_string(),
                base: i.base_coin.to_uppercase(),
                quote: i.quote_coin.to_uppercase(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn no_retry() -> RetryPolicy {
        RetryPolicy { max_retries: 0, ..RetryPolicy::default() }
    }

    fn query() -> KlineQuery {
        KlineQuery {
            interval: Interval::D1,
            start_time: 1609459200000,
            end_time: 1609718399999,
            limit: 1000,
        }
    }

    #[tokio::test]
    async fn parses_newest_first_klines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/kline"))
            .and(query_param("category", "spot"))
            .and(query_param("symbol", "ETHUSDT"))
            .and(query_param("interval", "D"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "retCode": 0,
                "retMsg": "OK",
                "result": {
                    "symbol": "ETHUSDT",
                    "category": "spot",
                    "list": [
                        ["1609545600000", "740.0", "780.0", "730.0", "775.0", "12000", "9000000"],
                        ["1609459200000", "730.0", "750.0", "715.0", "740.0", "10000", "7400000"]
                    ]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = BybitAdapter::new(&server.uri(), no_retry()).unwrap();
        let rows = adapter.fetch_klines("ETH", "USDT", &query()).await.unwrap();

        assert_eq!(rows.len(), 2);
        // order is fixed up later by normalize_rows
        assert_eq!(rows[0].open_time, 1609545600000);
        assert_eq!(rows[1].open, "730.0");
        assert_eq!(rows[1].close_time, 1609545599999);
    }

    #[tokio::test]
    async fn non_zero_ret_code_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/kline"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "retCode": 10001,
                "retMsg": "Not supported symbols",
                "result": {}
            })))
            .mount(&server)
            .await;

        let adapter = BybitAdapter::new(&server.uri(), no_retry()).unwrap();
        let err = adapter.fetch_klines("XYZ", "USDT", &query()).await.unwrap_err();

        assert!(err.to_string().contains("10001"));
    }

    #[tokio::test]
    async fn lists_trading_instruments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/instruments-info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "retCode": 0,
                "retMsg": "OK",
                "result": {
                    "category": "spot",
                    "list": [
                        {"symbol": "BTCUSDT", "baseCoin": "BTC", "quoteCoin": "USDT", "status": "Trading"},
                        {"symbol": "OLDUSDT", "baseCoin": "OLD", "quoteCoin": "USDT", "status": "Closed"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let adapter = BybitAdapter::new(&server.uri(), no_retry()).unwrap();
        let listings = adapter.list_spot_coins().await.unwrap();

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].base, "BTC");
    }
}
