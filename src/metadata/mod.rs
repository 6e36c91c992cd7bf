//! Market-data metadata provider access
//!
//! This module provides:
//! - The provider abstraction (`MetadataProvider`)
//! - A CoinGecko implementation
//! - `RateLimitedMetadataClient`, the only way the rest of the
//!   application talks to a provider: sliding-window rate limit
//!   plus a short-TTL coalescing cache

pub mod cache;
pub mod client;
pub mod coingecko;
pub mod limiter;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;

use crate::schema::MarketSnapshot;

pub use client::RateLimitedMetadataClient;
pub use coingecko::CoinGeckoProvider;

/// Market row for one provider id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarketQuote {
    pub id: String,
    #[serde(rename = "current_price")]
    pub price_usd: Option<f64>,
    #[serde(rename = "market_cap")]
    pub market_cap_usd: Option<f64>,
    #[serde(rename = "price_change_percentage_24h")]
    pub change_24h: Option<f64>,
}

impl MarketQuote {
    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            price_usd: self.price_usd,
            market_cap_usd: self.market_cap_usd,
            change_24h: self.change_24h,
        }
    }
}

/// Entry of the provider's coin directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderCoin {
    pub id: String,
    pub symbol: String,
    pub name: String,
}

/// Enrichment result for one provider id.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetInfo {
    pub snapshot: MarketSnapshot,
    pub is_stablecoin: bool,
}

/// Raw provider calls. Implementations do no caching and no rate
/// limiting; `RateLimitedMetadataClient` adds both.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Market rows for `ids`. Unknown ids are simply absent.
    async fn get_assets_info(&self, ids: &[String]) -> anyhow::Result<Vec<MarketQuote>>;

    /// The subset of `ids` classified as stablecoins.
    async fn get_stablecoin_ids(&self, ids: &[String]) -> anyhow::Result<HashSet<String>>;

    /// Full coin directory (id, symbol, name).
    async fn get_coin_list(&self) -> anyhow::Result<Vec<ProviderCoin>>;
}
