use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    error::CollectError,
    exchanges::adapter::KlineQuery,
    metrics::{METRICS, RuntimeMetrics},
    publisher::{EventPublisher, JobEvent, publish_logged},
    schema::{Coin, KlineRow},
    store::CoinStore,
};

use super::fallback::ExchangeFallbackFetcher;
use super::resolver::{PairCreationGateway, PairResolution, QuoteCoinResolver};

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Rows produced by one collection run, in catalogue order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct KlineCollectionResult {
    pub rows: Vec<KlineRow>,

    /// Pairs that contributed rows
    pub pair_count: usize,

    pub pairs_created: usize,

    /// Pairs created during the run that produced no rows
    pub orphaned_pairs: usize,

    /// Symbols of coins without data on any quote / exchange
    pub coins_skipped: Vec<String>,

    /// Symbols of coins whose collection errored or panicked
    pub coins_failed: Vec<String>,
}

/// Outcome of one `run`, as reported to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub job_name: String,
    pub success: bool,
    pub row_count: usize,
    pub pair_count: usize,
    pub pairs_created: usize,
    pub orphaned_pairs: usize,
    pub coins_skipped: usize,
    pub coins_failed: usize,
    pub error_detail: Option<String>,
}

impl RunSummary {
    fn succeeded(job_name: &str, result: &KlineCollectionResult) -> Self {
        Self {
            job_name: job_name.to_string(),
            success: true,
            row_count: result.rows.len(),
            pair_count: result.pair_count,
            pairs_created: result.pairs_created,
            orphaned_pairs: result.orphaned_pairs,
            coins_skipped: result.coins_skipped.len(),
            coins_failed: result.coins_failed.len(),
            error_detail: None,
        }
    }

    fn failed(job_name: &str, error: &CollectError) -> Self {
        Self {
            job_name: job_name.to_string(),
            success: false,
            row_count: 0,
            pair_count: 0,
            pairs_created: 0,
            orphaned_pairs: 0,
            coins_skipped: 0,
            coins_failed: 0,
            error_detail: Some(error.to_string()),
        }
    }

    fn event(&self) -> JobEvent {
        match &self.error_detail {
            None => JobEvent::run_succeeded(&self.job_name, self.row_count, self.pair_count),
            Some(detail) => JobEvent::run_failed(&self.job_name, detail.clone()),
        }
    }
}

/// Pairs created while resolving one coin.
#[derive(Debug, Default, Clone, Copy)]
struct PairTally {
    created: usize,
    orphaned: usize,
}

enum CoinOutcome {
    Collected { rows: Vec<KlineRow>, pairs: PairTally },
    NoData { pairs: PairTally },
    Failed { error: String, pairs: PairTally },
}

/// Kline collection orchestrator.
///
/// One run:
/// - loads coins and the quote priority from the store
/// - spawns one task per non-stablecoin coin
/// - merges per-coin rows in catalogue order
/// - atomically replaces the stored kline dataset
/// - publishes exactly one completion event
///
/// DESIGN:
/// - Per-coin tasks are isolated: an error or panic in one coin
///   only removes that coin from the result
/// - Fan-out is bounded by a semaphore
/// - Cancellation reaches every task; a cancelled run never
///   replaces the stored dataset
///
pub struct KlineCollector {
    job_name: String,
    store: Arc<dyn CoinStore>,
    fetcher: ExchangeFallbackFetcher,
    gateway: PairCreationGateway,
    publisher: Arc<dyn EventPublisher>,
    max_concurrency: usize,
}

impl KlineCollector {
    pub fn new(
        job_name: &str,
        store: Arc<dyn CoinStore>,
        fetcher: ExchangeFallbackFetcher,
        publisher: Arc<dyn EventPublisher>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            gateway: PairCreationGateway::new(store.clone()),
            store,
            fetcher,
            publisher,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Runs one full collection and reports it.
    ///
    /// Never returns an error: failures end up in the summary and
    /// in the completion event.
    pub async fn run(&self, query: KlineQuery, cancel: &CancellationToken) -> RunSummary {
        let started = Instant::now();

        log::info!(
            "{}: collecting {} klines from {:?} (limit {})",
            self.job_name,
            query.interval,
            self.fetcher.exchange_names(),
            query.limit
        );

        let summary = match self.collect_and_replace(query, cancel).await {
            Ok(summary) => summary,
            Err(e) => RunSummary::failed(&self.job_name, &e),
        };

        if summary.success {
            RuntimeMetrics::incr(&METRICS.runs_succeeded);
            log::info!(
                "{}: stored {} rows for {} pairs in {:.1?} ({} created, {} orphaned, {} skipped, {} failed)",
                self.job_name,
                summary.row_count,
                summary.pair_count,
                started.elapsed(),
                summary.pairs_created,
                summary.orphaned_pairs,
                summary.coins_skipped,
                summary.coins_failed
            );
        } else {
            RuntimeMetrics::incr(&METRICS.runs_failed);
            log::error!(
                "{}: run failed after {:.1?}: {}",
                self.job_name,
                started.elapsed(),
                summary.error_detail.as_deref().unwrap_or_default()
            );
        }

        publish_logged(self.publisher.as_ref(), &summary.event()).await;

        summary
    }

    async fn collect_and_replace(
        &self,
        query: KlineQuery,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, CollectError> {
        if cancel.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        let coins = self.store.get_all_coins().await.map_err(CollectError::CatalogueLoad)?;
        let quotes = self
            .store
            .get_quote_coins_prioritized()
            .await
            .map_err(CollectError::CatalogueLoad)?;

        let result = self.collect_all(coins, quotes, query, cancel).await?;

        // last chance to abort before touching stored data
        if cancel.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        let summary = RunSummary::succeeded(&self.job_name, &result);

        self.store
            .replace_all_kline_rows(result.rows)
            .await
            .map_err(CollectError::Replace)?;

        METRICS.rows_stored.fetch_add(summary.row_count, Ordering::Relaxed);

        Ok(summary)
    }

    /// Collects klines for every non-stablecoin in `coins`.
    ///
    /// `quotes` is the run-wide priority list, shared read-only by
    /// all per-coin tasks. Only cancellation fails the whole call.
    pub async fn collect_all(
        &self,
        coins: Vec<Coin>,
        quotes: Vec<Coin>,
        query: KlineQuery,
        cancel: &CancellationToken,
    ) -> Result<KlineCollectionResult, CollectError> {
        let subjects: Vec<Coin> = coins.into_iter().filter(|c| !c.is_stablecoin()).collect();
        let quotes = Arc::new(quotes);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let mut tasks = JoinSet::new();

        for (index, coin) in subjects.iter().cloned().enumerate() {
            let quotes = quotes.clone();
            let semaphore = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let gateway = self.gateway.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => None,
                    outcome = async {
                        let Ok(_permit) = semaphore.acquire().await else {
                            return CoinOutcome::Failed {
                                error: "collector shut down".into(),
                                pairs: PairTally::default(),
                            };
                        };
                        collect_coin(&coin, &quotes, &fetcher, &gateway, &query).await
                    } => Some(outcome),
                };
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<CoinOutcome>> = subjects.iter().map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = outcome,
                Err(e) if e.is_panic() => log::error!("per-coin collection task panicked: {}", e),
                Err(e) => log::warn!("per-coin collection task ended early: {}", e),
            }
        }

        if cancel.is_cancelled() {
            log::warn!("{}: run cancelled, discarding partial results", self.job_name);
            return Err(CollectError::Cancelled);
        }

        Ok(merge(&subjects, outcomes))
    }
}

/// Resolves pairs for one coin in quote priority order and fetches
/// until the first pair with data.
async fn collect_coin(
    coin: &Coin,
    quotes: &[Coin],
    fetcher: &ExchangeFallbackFetcher,
    gateway: &PairCreationGateway,
    query: &KlineQuery,
) -> CoinOutcome {
    let mut pairs = PairTally::default();

    for attempt in QuoteCoinResolver::new(coin, quotes) {
        let (pair_id, fresh) = match attempt.resolution {
            PairResolution::Existing(id) => (id, false),
            PairResolution::NeedsCreation => match gateway.create_pair(coin, attempt.quote).await {
                Ok(id) => {
                    pairs.created += 1;
                    (id, true)
                }
                Err(e) => return CoinOutcome::Failed { error: format!("{e:#}"), pairs },
            },
        };

        let Some(hit) = fetcher
            .fetch_first_available(&coin.symbol, &attempt.quote.symbol, query)
            .await
        else {
            log::warn!("no klines for {}/{} on any exchange", coin.symbol, attempt.quote.symbol);
            if fresh {
                pairs.orphaned += 1;
            }
            continue;
        };

        log::debug!(
            "{}/{}: {} rows from {}",
            coin.symbol,
            attempt.quote.symbol,
            hit.rows.len(),
            hit.exchange
        );

        let rows = hit
            .rows
            .into_iter()
            .map(|mut row| {
                row.trading_pair_id = pair_id;
                row
            })
            .collect();

        return CoinOutcome::Collected { rows, pairs };
    }

    CoinOutcome::NoData { pairs }
}

/// Concatenates per-coin outcomes in catalogue order.
///
/// A missing outcome means the task panicked.
fn merge(subjects: &[Coin], outcomes: Vec<Option<CoinOutcome>>) -> KlineCollectionResult {
    let mut result = KlineCollectionResult::default();

    for (coin, outcome) in subjects.iter().zip(outcomes) {
        let pairs = match outcome {
            Some(CoinOutcome::Collected { rows, pairs }) => {
                RuntimeMetrics::incr(&METRICS.coins_collected);
                result.rows.extend(rows);
                result.pair_count += 1;
                pairs
            }
            Some(CoinOutcome::NoData { pairs }) => {
                RuntimeMetrics::incr(&METRICS.coins_skipped);
                log::warn!("no data found for {}", coin.symbol);
                result.coins_skipped.push(coin.symbol.clone());
                pairs
            }
            Some(CoinOutcome::Failed { error, pairs }) => {
                RuntimeMetrics::incr(&METRICS.coins_failed);
                log::warn!("collection failed for {}: {}", coin.symbol, error);
                result.coins_failed.push(coin.symbol.clone());
                pairs
            }
            None => {
                RuntimeMetrics::incr(&METRICS.coins_failed);
                log::warn!("collection failed for {}: task panicked", coin.symbol);
                result.coins_failed.push(coin.symbol.clone());
                PairTally::default()
            }
        };

        result.pairs_created += pairs.created;
        result.orphaned_pairs += pairs.orphaned;
    }

    result
}
