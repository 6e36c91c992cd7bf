use crate::{
    metadata::RateLimitedMetadataClient,
    publisher::{EventPublisher, JobEvent, publish_logged},
    store::{CoinStore, MarketUpdate},
    warmup::WarmupFlag,
};

pub const DEFAULT_BATCH_SIZE: usize = 250;

/// Result of one enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    /// Coins newly mapped to a provider id during this pass
    pub coins_mapped: usize,
    pub coins_updated: usize,
    pub stablecoins: usize,
    pub batches_failed: usize,
}

/// Refreshes every coin's market snapshot and stablecoin flag.
///
/// FLOW:
/// - coins without a provider id are mapped first (by symbol/name)
/// - asset info is requested in batches of `batch_size` ids; a
///   failed batch is logged and skipped
/// - all updates are written through the store in one call
/// - the first pass that updates anything completes the warmup and
///   publishes the warmup event
///
/// Flagging a coin as stablecoin here is what removes it from the
/// set of kline collection subjects.
pub struct MarketEnricher<'a> {
    pub store: &'a dyn CoinStore,
    pub client: &'a RateLimitedMetadataClient,
    pub publisher: &'a dyn EventPublisher,
    pub warmup: &'a WarmupFlag,
    pub batch_size: usize,
}

impl MarketEnricher<'_> {
    pub async fn run(&self) -> anyhow::Result<EnrichmentSummary> {
        let coins = self.store.get_all_coins().await?;
        let mut summary = EnrichmentSummary::default();

        let unmapped: Vec<_> = coins.iter().filter(|c| c.external_id.is_none()).cloned().collect();
        let resolved = if unmapped.is_empty() {
            Default::default()
        } else {
            match self.client.resolve_external_ids(&unmapped).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    log::warn!("provider id resolution failed, enriching mapped coins only: {}", e);
                    Default::default()
                }
            }
        };
        summary.coins_mapped = resolved.len();

        // (coin id, provider id)
        let targets: Vec<(i64, String)> = coins
            .iter()
            .filter_map(|c| {
                c.external_id
                    .clone()
                    .or_else(|| resolved.get(&c.id).cloned())
                    .map(|ext| (c.id, ext))
            })
            .collect();

        let mut updates = Vec::with_capacity(targets.len());

        for batch in targets.chunks(self.batch_size.max(1)) {
            let ids: Vec<String> = batch.iter().map(|(_, ext)| ext.clone()).collect();

            let info = match self.client.get_asset_info(&ids).await {
                Ok(info) => info,
                Err(e) => {
                    summary.batches_failed += 1;
                    log::warn!("market data batch of {} ids skipped: {}", ids.len(), e);
                    continue;
                }
            };

            for (coin_id, ext) in batch {
                let Some(asset) = info.get(ext) else {
                    continue;
                };
                if asset.is_stablecoin {
                    summary.stablecoins += 1;
                }
                updates.push(MarketUpdate {
                    coin_id: *coin_id,
                    external_id: ext.clone(),
                    snapshot: asset.snapshot.clone(),
                    is_stablecoin: asset.is_stablecoin,
                });
            }
        }

        summary.coins_updated = updates.len();
        if !updates.is_empty() {
            self.store.update_market_data(updates).await?;
        }

        log::info!(
            "market data: {} coins updated ({} newly mapped, {} stablecoins, {} batches failed)",
            summary.coins_updated,
            summary.coins_mapped,
            summary.stablecoins,
            summary.batches_failed
        );

        if summary.coins_updated > 0 {
            if let Some(at) = self.warmup.mark_completed() {
                log::info!("warmup completed");
                publish_logged(self.publisher, &JobEvent::warmup_completed(at)).await;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::metadata::limiter::SlidingWindowLimiter;
    use crate::store::MemoryStore;
    use crate::testing::{RecordingPublisher, ScriptedProvider, catalogue};

    fn client(provider: ScriptedProvider) -> RateLimitedMetadataClient {
        RateLimitedMetadataClient::new(
            Arc::new(provider),
            SlidingWindowLimiter::new(Duration::from_secs(60), 100),
            Duration::from_secs(30),
        )
    }

    fn provider() -> ScriptedProvider {
        ScriptedProvider::default()
            .with_listed("bitcoin", "btc", "Bitcoin")
            .with_listed("ethereum", "eth", "Ethereum")
            .with_listed("tether", "usdt", "Tether")
            .with_quote("bitcoin", 60_000.0)
            .with_quote("ethereum", 3_000.0)
            .with_quote("tether", 1.0)
            .with_stablecoin("tether")
    }

    #[tokio::test]
    async fn maps_and_updates_every_known_coin() {
        let store = MemoryStore::new(catalogue());
        let client = client(provider());
        let publisher = RecordingPublisher::default();
        let warmup = WarmupFlag::new();

        let summary = MarketEnricher {
            store: &store,
            client: &client,
            publisher: &publisher,
            warmup: &warmup,
            batch_size: 2,
        }
        .run()
        .await
        .unwrap();

        assert_eq!(summary.coins_mapped, 3);
        assert_eq!(summary.coins_updated, 3);
        assert_eq!(summary.stablecoins, 1);

        let coins = store.get_all_coins().await.unwrap();
        let btc = coins.iter().find(|c| c.symbol == "BTC").unwrap();
        assert_eq!(btc.external_id.as_deref(), Some("bitcoin"));
        assert_eq!(btc.market.as_ref().unwrap().price_usd, Some(60_000.0));

        // USDC is unknown to the provider and keeps its catalogue data
        let usdc = coins.iter().find(|c| c.symbol == "USDC").unwrap();
        assert!(usdc.market.is_none());
    }

    #[tokio::test]
    async fn warmup_event_is_sent_once() {
        let store = MemoryStore::new(catalogue());
        let client = client(provider());
        let publisher = RecordingPublisher::default();
        let warmup = WarmupFlag::new();

        let enricher = MarketEnricher {
            store: &store,
            client: &client,
            publisher: &publisher,
            warmup: &warmup,
            batch_size: 250,
        };
        enricher.run().await.unwrap();
        enricher.run().await.unwrap();

        let warmups = publisher
            .events()
            .into_iter()
            .filter(|e| matches!(e, JobEvent::WarmupCompleted(_)))
            .count();
        assert_eq!(warmups, 1);
        assert!(warmup.is_completed());
    }

    #[tokio::test]
    async fn failed_batches_are_skipped() {
        let store = MemoryStore::new(catalogue());
        let client = client(ScriptedProvider { fail_markets: true, ..provider() });
        let publisher = RecordingPublisher::default();
        let warmup = WarmupFlag::new();

        let summary = MarketEnricher {
            store: &store,
            client: &client,
            publisher: &publisher,
            warmup: &warmup,
            batch_size: 1,
        }
        .run()
        .await
        .unwrap();

        assert_eq!(summary.batches_failed, 3);
        assert_eq!(summary.coins_updated, 0);
        assert!(!warmup.is_completed());
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn provider_stablecoin_flag_reaches_the_catalogue() {
        let store = MemoryStore::new(catalogue());
        let client = client(provider().with_stablecoin("ethereum"));
        let publisher = RecordingPublisher::default();
        let warmup = WarmupFlag::new();

        MarketEnricher {
            store: &store,
            client: &client,
            publisher: &publisher,
            warmup: &warmup,
            batch_size: 250,
        }
        .run()
        .await
        .unwrap();

        let coins = store.get_all_coins().await.unwrap();
        assert!(coins.iter().find(|c| c.symbol == "ETH").unwrap().is_stablecoin());
        assert!(!coins.iter().find(|c| c.symbol == "BTC").unwrap().is_stablecoin());
    }
}
