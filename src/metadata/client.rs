use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    error::MetadataError,
    metrics::{METRICS, RuntimeMetrics},
    schema::Coin,
    util::eq_ignore_case,
};

use super::cache::TtlCache;
use super::limiter::SlidingWindowLimiter;
use super::{AssetInfo, MetadataProvider, ProviderCoin};

type AssetMap = Arc<HashMap<String, AssetInfo>>;

/// Rate-limited, cached access to the metadata provider.
///
/// RULES:
/// - Every upstream load takes exactly one limiter permit; the two
///   calls of an asset load (markets + stablecoin flags) share it
/// - Cache hits touch neither the network nor the limiter
/// - Concurrent requests for the same id set coalesce into one load
/// - An asset load is all-or-nothing: if either call fails, nothing
///   is returned and nothing is cached
pub struct RateLimitedMetadataClient {
    provider: Arc<dyn MetadataProvider>,
    limiter: SlidingWindowLimiter,
    assets: TtlCache<Vec<String>, AssetMap>,
    directory: TtlCache<(), Arc<Vec<ProviderCoin>>>,
}

impl RateLimitedMetadataClient {
    pub fn new(provider: Arc<dyn MetadataProvider>, limiter: SlidingWindowLimiter, ttl: Duration) -> Self {
        Self {
            provider,
            limiter,
            assets: TtlCache::new(ttl),
            directory: TtlCache::new(ttl),
        }
    }

    pub fn permits_granted(&self) -> usize {
        self.limiter.permits_granted()
    }

    /// Market snapshot and stablecoin flag per provider id.
    ///
    /// Ids unknown to the provider are absent from the result.
    pub async fn get_asset_info(&self, ids: &[String]) -> Result<HashMap<String, AssetInfo>, MetadataError> {
        let mut key: Vec<String> = ids.to_vec();
        key.sort();
        key.dedup();

        if key.is_empty() {
            return Ok(HashMap::new());
        }

        let (info, hit) = self
            .assets
            .get_or_try_load(key.clone(), || self.load_assets(key))
            .await?;

        if hit {
            RuntimeMetrics::incr(&METRICS.metadata_cache_hits);
        }

        Ok((*info).clone())
    }

    async fn load_assets(&self, ids: Vec<String>) -> Result<AssetMap, MetadataError> {
        self.limiter.acquire().await;
        RuntimeMetrics::incr(&METRICS.metadata_upstream_calls);
        log::debug!("loading metadata for {} ids", ids.len());

        let (quotes, stable) = tokio::join!(
            self.provider.get_assets_info(&ids),
            self.provider.get_stablecoin_ids(&ids),
        );

        let quotes = quotes.map_err(|e| MetadataError::Upstream(format!("{e:#}")))?;
        let stable = stable.map_err(|e| MetadataError::Stablecoins(format!("{e:#}")))?;

        let info = quotes
            .into_iter()
            .filter(|q| ids.binary_search(&q.id).is_ok())
            .map(|q| {
                let info = AssetInfo {
                    snapshot: q.snapshot(),
                    is_stablecoin: stable.contains(&q.id),
                };
                (q.id, info)
            })
            .collect();

        Ok(Arc::new(info))
    }

    /// Maps catalogue coins to provider ids, keyed by coin id.
    ///
    /// Matching is on symbol (case-insensitive). When the provider
    /// lists several coins under one symbol the name decides; if
    /// it cannot, the coin stays unmapped.
    pub async fn resolve_external_ids(&self, coins: &[Coin]) -> Result<HashMap<i64, String>, MetadataError> {
        let (directory, hit) = self
            .directory
            .get_or_try_load((), || self.load_directory())
            .await?;

        if hit {
            RuntimeMetrics::incr(&METRICS.metadata_cache_hits);
        }

        let mut mapped = HashMap::new();
        for coin in coins {
            let candidates: Vec<&ProviderCoin> = directory
                .iter()
                .filter(|p| eq_ignore_case(&p.symbol, &coin.symbol))
                .collect();

            let chosen = match candidates.as_slice() {
                [] => None,
                [only] => Some(*only),
                several => several.iter().copied().find(|p| eq_ignore_case(&p.name, &coin.name)),
            };

            match chosen {
                Some(entry) => {
                    mapped.insert(coin.id, entry.id.clone());
                }
                None if !candidates.is_empty() => {
                    log::debug!(
                        "{} is ambiguous at the provider ({} candidates), left unmapped",
                        coin.symbol,
                        candidates.len()
                    );
                }
                None => log::debug!("{} is unknown to the provider", coin.symbol),
            }
        }

        Ok(mapped)
    }

    async fn load_directory(&self) -> Result<Arc<Vec<ProviderCoin>>, MetadataError> {
        self.limiter.acquire().await;
        RuntimeMetrics::incr(&METRICS.metadata_upstream_calls);

        let list = self
            .provider
            .get_coin_list()
            .await
            .map_err(|e| MetadataError::Upstream(format!("{e:#}")))?;

        log::debug!("provider directory holds {} coins", list.len());
        Ok(Arc::new(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, coin};

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("coin-{i}")).collect()
    }

    fn client(provider: Arc<ScriptedProvider>, max_requests: usize) -> RateLimitedMetadataClient {
        RateLimitedMetadataClient::new(
            provider,
            SlidingWindowLimiter::new(Duration::from_secs(60), max_requests),
            Duration::from_secs(30),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_request_within_ttl_hits_the_cache() {
        let mut provider = ScriptedProvider::default();
        for id in ids(50) {
            provider = provider.with_quote(&id, 1.0);
        }
        let provider = Arc::new(provider);
        let client = client(provider.clone(), 10);

        let first = client.get_asset_info(&ids(50)).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = client.get_asset_info(&ids(50)).await.unwrap();

        assert_eq!(first.len(), 50);
        assert_eq!(first, second);
        assert_eq!(provider.market_calls(), 1);
        assert_eq!(provider.stablecoin_calls(), 1);
        assert_eq!(client.permits_granted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn id_order_and_duplicates_share_a_cache_entry() {
        let provider = Arc::new(ScriptedProvider::default().with_quote("a", 1.0).with_quote("b", 2.0));
        let client = client(provider.clone(), 10);

        client.get_asset_info(&["b".into(), "a".into()]).await.unwrap();
        client.get_asset_info(&["a".into(), "b".into(), "a".into()]).await.unwrap();

        assert_eq!(provider.market_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_coalesce_into_one_permit() {
        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_secs(2)),
            ..ScriptedProvider::default()
        }.with_quote("bitcoin", 60_000.0));
        let client = client(provider.clone(), 10);
        let wanted = vec!["bitcoin".to_string()];

        let (a, b) = tokio::join!(client.get_asset_info(&wanted), client.get_asset_info(&wanted));

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(provider.market_calls(), 1);
        assert_eq!(client.permits_granted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stablecoin_flags_are_zipped_by_id() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .with_quote("tether", 1.0)
                .with_quote("bitcoin", 60_000.0)
                .with_stablecoin("tether"),
        );
        let client = client(provider, 10);

        let info = client
            .get_asset_info(&["tether".into(), "bitcoin".into(), "unknown".into()])
            .await
            .unwrap();

        assert!(info["tether"].is_stablecoin);
        assert!(!info["bitcoin"].is_stablecoin);
        assert_eq!(info["bitcoin"].snapshot.price_usd, Some(60_000.0));
        assert!(!info.contains_key("unknown"));
    }

    #[tokio::test(start_paused = true)]
    async fn either_call_failing_fails_everything_and_is_retried() {
        let provider = Arc::new(ScriptedProvider {
            fail_stablecoins: true,
            ..ScriptedProvider::default()
        }.with_quote("bitcoin", 60_000.0));
        let client = client(provider.clone(), 10);
        let wanted = vec!["bitcoin".to_string()];

        let first = client.get_asset_info(&wanted).await;
        let second = client.get_asset_info(&wanted).await;

        assert!(matches!(first, Err(MetadataError::Stablecoins(_))));
        assert!(second.is_err());
        assert_eq!(provider.market_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn market_failure_is_reported_as_upstream() {
        let provider = Arc::new(ScriptedProvider { fail_markets: true, ..ScriptedProvider::default() });
        let client = client(provider, 10);

        let result = client.get_asset_info(&["bitcoin".to_string()]).await;

        assert!(matches!(result, Err(MetadataError::Upstream(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_loads_queue_behind_the_limiter() {
        let provider = Arc::new(ScriptedProvider::default().with_quote("a", 1.0).with_quote("b", 2.0));
        let client = client(provider.clone(), 1);
        let start = tokio::time::Instant::now();

        client.get_asset_info(&["a".into()]).await.unwrap();
        client.get_asset_info(&["b".into()]).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(provider.market_calls(), 2);
        assert_eq!(client.permits_granted(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_request_never_calls_upstream() {
        let provider = Arc::new(ScriptedProvider::default());
        let client = client(provider.clone(), 10);

        assert!(client.get_asset_info(&[]).await.unwrap().is_empty());
        assert_eq!(provider.market_calls(), 0);
        assert_eq!(client.permits_granted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn external_ids_resolve_by_symbol_then_name() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .with_listed("bitcoin", "btc", "Bitcoin")
                .with_listed("ethereum", "eth", "Ethereum")
                .with_listed("ethereum-wormhole", "eth", "Ethereum (Wormhole)")
                .with_listed("uni-a", "uni", "Uniswap A")
                .with_listed("uni-b", "uni", "Uniswap B"),
        );
        let client = client(provider.clone(), 10);

        let coins = vec![
            coin(1, "BTC", "Bitcoin"),
            coin(2, "ETH", "ethereum"),
            coin(3, "UNI", "Uniswap"),
            coin(4, "NOPE", "Nope"),
        ];

        let mapped = client.resolve_external_ids(&coins).await.unwrap();
        client.resolve_external_ids(&coins).await.unwrap();

        assert_eq!(mapped.get(&1).map(String::as_str), Some("bitcoin"));
        assert_eq!(mapped.get(&2).map(String::as_str), Some("ethereum"));
        assert!(!mapped.contains_key(&3));
        assert!(!mapped.contains_key(&4));
        assert_eq!(provider.coin_list_calls(), 1);
    }
}
