/// Utility helpers shared by adapters and the collector.
///
/// This module contains:
/// - Symbol conversion between internal BASE/QUOTE pairs and
///   exchange-specific market ids
/// - Time helpers
/// - Case-insensitive name matching
///
/// IMPORTANT:
/// - No exchange I/O lives here.
/// - Everything in this module is deterministic.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Convert an internal (base, quote) pair into the exchange market id.
///
/// Examples:
/// - ("gateio",  "BTC", "USDT") -> "BTC_USDT"
/// - ("binance", "BTC", "USDT") -> "BTCUSDT"
/// - ("okx",     "BTC", "USDT") -> "BTC-USDT"
///
/// Symbols are upper-cased on the way out; every supported exchange
/// expects uppercase market ids on its REST API.
pub fn symbol_to_exchange(exchange: &str, base: &str, quote: &str) -> String {
    let base = base.to_uppercase();
    let quote = quote.to_uppercase();

    match exchange {
        "gateio" => format!("{base}_{quote}"),
        "binance" | "bybit" => format!("{base}{quote}"),
        "okx" | "kucoin" => format!("{base}-{quote}"),
        _ => format!("{base}/{quote}"),
    }
}

/// Case-insensitive ordinal comparison.
///
/// Used for quote coin matching, where the catalogue and the pair
/// records may disagree on casing ("Tether" vs "TETHER").
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Formats a millisecond timestamp for log output.
pub fn fmt_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}
