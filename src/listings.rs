use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures_util::future::join_all;

use crate::{
    exchanges::adapter::ExchangeAdapter,
    store::{CoinStore, PairExchanges},
};

/// Result of one listing sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingSummary {
    pub exchanges_listed: usize,
    pub exchanges_failed: usize,
    pub pairs_updated: usize,
}

/// Records, for every known trading pair, which exchanges currently
/// list it as a spot market.
///
/// All exchanges are queried concurrently. An exchange whose listing
/// call fails is logged and left out; if every exchange fails the
/// store is not touched, so a full outage never wipes the mapping.
pub async fn sync_pair_exchanges(
    store: &dyn CoinStore,
    adapters: &[Arc<dyn ExchangeAdapter>],
) -> anyhow::Result<ListingSummary> {
    let mut summary = ListingSummary::default();

    let results = join_all(adapters.iter().map(|adapter| async move {
        (adapter.name(), adapter.list_spot_coins().await)
    }))
    .await;

    // (BASE, QUOTE) -> exchanges, in configured exchange order
    let mut listed: HashMap<(String, String), Vec<String>> = HashMap::new();

    for (exchange, result) in results {
        match result {
            Ok(listings) => {
                summary.exchanges_listed += 1;
                log::debug!("{}: {} spot markets", exchange, listings.len());

                let mut seen = BTreeSet::new();
                for listing in listings {
                    let key = (listing.base.to_uppercase(), listing.quote.to_uppercase());
                    if seen.insert(key.clone()) {
                        listed.entry(key).or_default().push(exchange.to_string());
                    }
                }
            }
            Err(e) => {
                summary.exchanges_failed += 1;
                log::warn!("{}: spot listing failed: {:#}", exchange, e);
            }
        }
    }

    if summary.exchanges_listed == 0 {
        log::warn!("no exchange listing available, pair exchanges left unchanged");
        return Ok(summary);
    }

    let coins = store.get_all_coins().await?;

    let updates: Vec<PairExchanges> = coins
        .iter()
        .flat_map(|coin| {
            let listed = &listed;
            coin.trading_pairs.iter().map(move |pair| {
                let key = (coin.symbol.to_uppercase(), pair.quote_symbol.to_uppercase());
                PairExchanges {
                    pair_id: pair.id,
                    exchanges: listed.get(&key).cloned().unwrap_or_default(),
                }
            })
        })
        .collect();

    summary.pairs_updated = updates.len();
    store.update_pair_exchanges(updates).await?;

    log::info!(
        "pair exchanges: {} pairs updated from {} exchanges ({} failed)",
        summary.pairs_updated,
        summary.exchanges_listed,
        summary.exchanges_failed
    );

    Ok(summary)
}
