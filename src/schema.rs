use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Core data model shared by the whole collection pipeline.
///
/// These types flow between:
/// - The coin store (catalogue, trading pairs, kline snapshot)
/// - Exchange adapters (kline rows, spot listings)
/// - The collector runtime (resolution + fallback)
/// - The metadata client (market snapshots)
///
/// DESIGN NOTES:
/// - Timestamps are always milliseconds since Unix epoch.
/// - Kline prices and volumes stay strings, exactly as the
///   exchange returned them.

// ------------------------------------------------------------
// Coin
// ------------------------------------------------------------
//
// A coin of the catalogue. Created by catalogue ingestion,
// market snapshot refreshed by the enrichment job, never
// deleted by the collector.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    pub id: i64,

    /// Unique uppercase ticker symbol (e.g. "BTC")
    pub symbol: String,

    /// Display name (e.g. "Bitcoin")
    pub name: String,

    #[serde(default)]
    pub category: Option<CoinCategory>,

    /// Identifier at the market-data metadata provider
    #[serde(default)]
    pub external_id: Option<String>,

    #[serde(default)]
    pub market: Option<MarketSnapshot>,

    /// Trading pairs where this coin is the main currency
    #[serde(default)]
    pub trading_pairs: Vec<TradingPair>,
}

impl Coin {
    pub fn is_stablecoin(&self) -> bool {
        self.category == Some(CoinCategory::Stablecoin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinCategory {
    Stablecoin,
    Fiat,
}

/// Price / market cap snapshot, all values in USD.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub change_24h: Option<f64>,
}

// ------------------------------------------------------------
// Trading pair
// ------------------------------------------------------------
//
// INVARIANT:
// - At most one trading pair per (main coin, quote coin).
//
// The quote coin is referenced both by id and by symbol/name,
// because quote matching during resolution is done on
// symbol + name.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPair {
    pub id: i64,
    pub quote_coin_id: i64,
    pub quote_symbol: String,
    pub quote_name: String,

    /// Exchanges listing this pair, refreshed by the listing sync
    #[serde(default)]
    pub exchanges: Vec<String>,
}

// ------------------------------------------------------------
// Kline row
// ------------------------------------------------------------
//
// One candlestick of one trading pair.
//
// Natural key: (trading_pair_id, open_time).
// Rows of one pair are ordered by open_time ascending and never
// contain duplicate open times.
//
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineRow {
    /// Resolved trading pair; 0 until tagged by the collector
    pub trading_pair_id: i64,

    pub open_time: i64,

    /// Numeric values remain strings as returned by the exchange
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,

    pub close_time: i64,
}

/// Sorts rows by open time, drops repeated open times (first one
/// wins) and keeps at most `limit` rows.
///
/// Exchanges disagree on ordering (Bybit, OKX and KuCoin answer
/// newest-first), so every adapter result goes through this before
/// it is considered.
pub fn normalize_rows(mut rows: Vec<KlineRow>, limit: usize) -> Vec<KlineRow> {
    rows.sort_by_key(|r| r.open_time);
    rows.dedup_by_key(|r| r.open_time);
    rows.truncate(limit);
    rows
}

// ------------------------------------------------------------
// Kline interval
// ------------------------------------------------------------
//
// Fixed enumeration of supported candle widths. Each adapter
// maps these onto its own wire codes.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1month")]
    Month1,
}

impl Interval {
    pub const ALL: [Interval; 9] = [
        Interval::M1,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H4,
        Interval::D1,
        Interval::W1,
        Interval::Month1,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
            Interval::W1 => "1w",
            Interval::Month1 => "1month",
        }
    }

    /// Bucket width in milliseconds. A month counts as 30 days.
    pub fn duration_ms(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Interval::M1 => MINUTE,
            Interval::M5 => 5 * MINUTE,
            Interval::M15 => 15 * MINUTE,
            Interval::M30 => 30 * MINUTE,
            Interval::H1 => 60 * MINUTE,
            Interval::H4 => 240 * MINUTE,
            Interval::D1 => 1_440 * MINUTE,
            Interval::W1 => 7 * 1_440 * MINUTE,
            Interval::Month1 => 30 * 1_440 * MINUTE,
        }
    }

    /// Close time of the bucket opening at `open_time`, for
    /// exchanges that only report the open time.
    pub fn close_time(&self, open_time: i64) -> i64 {
        open_time + self.duration_ms() - 1
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.label() == s)
            .ok_or_else(|| anyhow::anyhow!("unsupported kline interval '{}'", s))
    }
}

// ------------------------------------------------------------
// Spot listing
// ------------------------------------------------------------
//
// One tradable spot market as reported by an exchange's
// "list spot coins" endpoint. Symbols are uppercase.
//
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpotListing {
    pub exchange: String,
    pub base: String,
    pub quote: String,
}
