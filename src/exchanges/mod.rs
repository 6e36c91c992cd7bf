//! Exchange adapter registry and factory
//!
//! This module provides:
//! - Central registration of all supported exchanges
//! - A factory function to resolve adapters by name
//!
//! All exchange-specific logic must live in dedicated adapter modules.
//! The rest of the application must interact exclusively through
//! the `ExchangeAdapter` trait.

pub mod adapter;
pub mod http;
mod binance;
mod bybit;
mod gateio;
mod kucoin;
mod okx;

use std::sync::Arc;
use adapter::ExchangeAdapter;
use http::RetryPolicy;

/// Names accepted by `get_adapter`, in no particular order.
pub const SUPPORTED: [&str; 5] = ["binance", "bybit", "okx", "kucoin", "gateio"];

/// Returns an exchange adapter instance by name.
///
/// This function acts as a **central factory / registry** for all
/// supported exchanges.
///
/// PARAMETERS:
/// - `name`: Exchange identifier from configuration
/// - `base_url`: Optional REST base URL override (proxies, tests)
///
/// RETURNS:
/// - `Ok(Some(adapter))` if the exchange is supported
/// - `Ok(None)` if the exchange is unknown
/// - `Err` if the HTTP client could not be built
///
/// THREADING:
/// - Adapters are wrapped in `Arc`
/// - The same adapter instance is shared by every per-coin task
///
pub fn get_adapter(
    name: &str,
    base_url: Option<&str>,
) -> anyhow::Result<Option<Arc<dyn ExchangeAdapter>>> {
    let retry = RetryPolicy::default();

    let adapter: Arc<dyn ExchangeAdapter> = match name {
        "binance" => Arc::new(binance::BinanceAdapter::new(
            base_url.unwrap_or(binance::DEFAULT_BASE_URL),
            retry,
        )?),
        "bybit" => Arc::new(bybit::BybitAdapter::new(
            base_url.unwrap_or(bybit::DEFAULT_BASE_URL),
            retry,
        )?),
        "okx" => Arc::new(okx::OkxAdapter::new(
            base_url.unwrap_or(okx::DEFAULT_BASE_URL),
            retry,
        )?),
        "kucoin" => Arc::new(kucoin::KucoinAdapter::new(
            base_url.unwrap_or(kucoin::DEFAULT_BASE_URL),
            retry,
        )?),
        "gateio" => Arc::new(gateio::GateIoAdapter::new(
            base_url.unwrap_or(gateio::DEFAULT_BASE_URL),
            retry,
        )?),
        _ => return Ok(None),
    };

    Ok(Some(adapter))
}
