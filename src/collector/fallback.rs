use std::sync::Arc;

use crate::{
    exchanges::adapter::{ExchangeAdapter, KlineQuery},
    metrics::{METRICS, RuntimeMetrics},
    schema::{KlineRow, normalize_rows},
};

/// Rows found for one pair and the exchange that served them.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchHit {
    pub rows: Vec<KlineRow>,
    pub exchange: &'static str,
}

/// Queries one trading pair against an ordered exchange list.
///
/// RULES:
/// - Exchanges are tried strictly in the configured order
/// - The first non-empty result wins; later exchanges are never
///   called
/// - Errors and empty results both mean "no data here, try next"
/// - No retries at this level (adapters own their retry policy)
#[derive(Clone)]
pub struct ExchangeFallbackFetcher {
    exchanges: Arc<Vec<Arc<dyn ExchangeAdapter>>>,
}

impl ExchangeFallbackFetcher {
    pub fn new(exchanges: Vec<Arc<dyn ExchangeAdapter>>) -> Self {
        Self { exchanges: Arc::new(exchanges) }
    }

    pub fn exchange_names(&self) -> Vec<&'static str> {
        self.exchanges.iter().map(|e| e.name()).collect()
    }

    /// Returns `None` when no exchange had data for BASE/QUOTE.
    pub async fn fetch_first_available(
        &self,
        base: &str,
        quote: &str,
        query: &KlineQuery,
    ) -> Option<FetchHit> {
        for exchange in self.exchanges.iter() {
            RuntimeMetrics::incr(&METRICS.exchange_fetches);

            match exchange.fetch_klines(base, quote, query).await {
                Ok(rows) => {
                    let rows = normalize_rows(rows, query.limit);
                    if rows.is_empty() {
                        log::warn!("{} has no klines for {}/{}", exchange.name(), base, quote);
                        continue;
                    }

                    log::debug!(
                        "{} served {} klines for {}/{}",
                        exchange.name(),
                        rows.len(),
                        base,
                        quote
                    );
                    return Some(FetchHit { rows, exchange: exchange.name() });
                }
                Err(e) => {
                    RuntimeMetrics::incr(&METRICS.exchange_errors);
                    log::warn!("{} kline fetch for {}/{} failed: {:#}", exchange.name(), base, quote, e);
                }
            }
        }

        None
    }
}
