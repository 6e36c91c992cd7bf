use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::exchanges::http::{RestClient, RetryPolicy};

use super::{MarketQuote, MetadataProvider, ProviderCoin};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// `/coins/markets` page size ceiling.
pub const MAX_IDS_PER_REQUEST: usize = 250;

const API_KEY_HEADER: &str = "x-cg-demo-api-key";

const NO_RETRY: RetryPolicy = RetryPolicy {
    initial_backoff: Duration::ZERO,
    max_backoff: Duration::ZERO,
    max_retries: 0,
};

/// CoinGecko public REST provider
///
/// Endpoints:
/// - GET /coins/markets?vs_currency=usd&ids=...
/// - GET /coins/markets?vs_currency=usd&ids=...&category=stablecoins
/// - GET /coins/list
///
/// Works keyless on the public tier; a demo API key raises the
/// upstream quota. The client-side limiter still applies either way.
///
/// Requests are never retried here: every HTTP call must be covered
/// by a limiter permit, so a failed load is simply retried by the
/// next cache miss.
pub struct CoinGeckoProvider {
    http: RestClient,
}

impl CoinGeckoProvider {
    pub fn new(base_url: &str, api_key: Option<&str>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key).context("metadata api key is not a valid header value")?;
            headers.insert(API_KEY_HEADER, value);
        }

        Ok(Self {
            http: RestClient::with_headers(base_url, NO_RETRY, headers)?,
        })
    }

    async fn markets(&self, ids: &[String], category: Option<&str>) -> anyhow::Result<Vec<MarketQuote>> {
        if ids.len() > MAX_IDS_PER_REQUEST {
            anyhow::bail!("{} ids requested, at most {} per call", ids.len(), MAX_IDS_PER_REQUEST);
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut params = vec![
            ("vs_currency", "usd".to_string()),
            ("ids", ids.join(",")),
            ("per_page", MAX_IDS_PER_REQUEST.to_string()),
            ("page", "1".to_string()),
        ];
        if let Some(category) = category {
            params.push(("category", category.to_string()));
        }

        self.http.get_json("/coins/markets", &params).await
    }
}

#[async_trait]
impl MetadataProvider for CoinGeckoProvider {
    async fn get_assets_info(&self, ids: &[String]) -> anyhow::Result<Vec<MarketQuote>> {
        self.markets(ids, None).await
    }

    async fn get_stablecoin_ids(&self, ids: &[String]) -> anyhow::Result<HashSet<String>> {
        let stable = self.markets(ids, Some("stablecoins")).await?;
        Ok(stable.into_iter().map(|q| q.id).collect())
    }

    async fn get_coin_list(&self) -> anyhow::Result<Vec<ProviderCoin>> {
        self.http.get_json("/coins/list", &[]).await
    }
}
