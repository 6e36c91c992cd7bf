use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for the collector.
///
/// Purpose:
/// - Track collection runs and their outcome
/// - Track per-coin resolution results
/// - Track exchange and metadata traffic
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Runs
    pub runs_succeeded: AtomicUsize,
    pub runs_failed: AtomicUsize,

    // Coins
    pub coins_collected: AtomicUsize,
    pub coins_skipped: AtomicUsize,
    pub coins_failed: AtomicUsize,
    pub pairs_created: AtomicUsize,
    pub rows_stored: AtomicUsize,

    // Exchanges
    pub exchange_fetches: AtomicUsize,
    pub exchange_errors: AtomicUsize,

    // Metadata provider
    pub metadata_cache_hits: AtomicUsize,
    pub metadata_upstream_calls: AtomicUsize,
    pub rate_limit_waits: AtomicUsize,
}

impl RuntimeMetrics {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// One-line snapshot, logged after every cycle.
    pub fn report_line(&self) -> String {
        format!(
            "[METRICS] runs_ok={} runs_failed={} coins_ok={} coins_skipped={} coins_failed={} pairs_created={} rows={} fetches={} fetch_err={} meta_hits={} meta_calls={} rl_waits={}",
            self.runs_succeeded.load(Ordering::Relaxed),
            self.runs_failed.load(Ordering::Relaxed),
            self.coins_collected.load(Ordering::Relaxed),
            self.coins_skipped.load(Ordering::Relaxed),
            self.coins_failed.load(Ordering::Relaxed),
            self.pairs_created.load(Ordering::Relaxed),
            self.rows_stored.load(Ordering::Relaxed),
            self.exchange_fetches.load(Ordering::Relaxed),
            self.exchange_errors.load(Ordering::Relaxed),
            self.metadata_cache_hits.load(Ordering::Relaxed),
            self.metadata_upstream_calls.load(Ordering::Relaxed),
            self.rate_limit_waits.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
