use serde_json::Value;

use crate::schema::{Interval, KlineRow, SpotListing};

/// Parameters of one kline request, shared by every adapter.
///
/// Times are inclusive bounds in milliseconds. `limit` is the caller
/// cap; adapters additionally clamp it to their own API maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KlineQuery {
    pub interval: Interval,
    pub start_time: i64,
    pub end_time: i64,
    pub limit: usize,
}

/// ExchangeAdapter is the abstraction layer between:
/// - The generic collector runtime
/// - Exchange-specific REST APIs
///
/// Each exchange implementation must:
/// - Map the internal interval onto its wire code
/// - Convert BASE/QUOTE into its market id
/// - Normalize responses into `KlineRow` / `SpotListing`
///
/// DESIGN GOALS:
/// - Zero exchange-specific logic outside adapters
/// - One adapter per exchange
/// - New exchanges are added here, never by branching in the
///   collector
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Adapter instances are shared across per-coin tasks
///
#[async_trait::async_trait]
pub trait ExchangeAdapter: Send + Sync {

    /// Returns the canonical exchange name.
    ///
    /// CONTRACT:
    /// - Must match `exchanges[].name` in configuration
    /// - Lowercase and stable (used in logs and listing sets)
    fn name(&self) -> &'static str;

    /// Fetches candles for BASE/QUOTE.
    ///
    /// RETURNS:
    /// - `Ok(rows)` with rows in any order; an empty vec means the
    ///   exchange has no data for the range
    /// - `Err` on transport or API errors (including unknown symbols)
    ///
    /// Returned rows carry `trading_pair_id = 0`; the collector tags
    /// them with the resolved pair.
    ///
    /// Retries (if any) happen inside the adapter.
    async fn fetch_klines(
        &self,
        base: &str,
        quote: &str,
        query: &KlineQuery,
    ) -> anyhow::Result<Vec<KlineRow>>;

    /// Lists every tradable spot market of the exchange.
    async fn list_spot_coins(&self) -> anyhow::Result<Vec<SpotListing>>;
}

// ------------------------------------------------------------
// Shared parsing helpers
// ------------------------------------------------------------
//
// Exchanges encode candles as positional JSON arrays, mixing
// numbers and numeric strings. These helpers never panic;
// malformed entries yield `None` and are skipped by adapters.
//

/// Element `i` as a string, accepting JSON strings and numbers.
pub fn value_str(row: &[Value], i: usize) -> Option<String> {
    match row.get(i)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Element `i` as an integer, accepting JSON numbers and numeric
/// strings.
pub fn value_i64(row: &[Value], i: usize) -> Option<i64> {
    match row.get(i)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Rejects windows that cannot contain a single candle.
pub fn check_range(query: &KlineQuery) -> anyhow::Result<()> {
    if query.end_time < query.start_time {
        anyhow::bail!(
            "invalid kline range: start {} after end {}",
            query.start_time,
            query.end_time
        );
    }
    Ok(())
}
