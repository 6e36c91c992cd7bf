// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:      Configuration structs loaded from JSON
// - schema:      Catalogue and kline row definitions
// - util:        Shared helper utilities (time, symbols)
// - exchanges:   REST exchange adapters and adapter registry
// - collector:   Kline collection (fallback, resolution, runs)
// - metadata:    Rate-limited, cached market metadata client
// - store:       Catalogue / kline persistence
// - publisher:   Job completion events
// - enrichment:  Market data + stablecoin refresh job
// - listings:    Exchange listing sync job
// - warmup:      Process-wide "first warmup done" flag
//
mod collector;
mod config;
mod enrichment;
mod error;
mod exchanges;
mod listings;
mod metadata;
mod metrics;
mod publisher;
mod schema;
mod store;
mod util;
mod warmup;

#[cfg(test)]
mod testing;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::env;
use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::{CryptoProvider, ring};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use collector::fallback::ExchangeFallbackFetcher;
use collector::runner::KlineCollector;
use config::{Config, MetadataConfig, PublisherConfig, load_config};
use enrichment::MarketEnricher;
use exchanges::{adapter::{ExchangeAdapter, KlineQuery}, get_adapter};
use metadata::{CoinGeckoProvider, RateLimitedMetadataClient, limiter::SlidingWindowLimiter};
use metrics::METRICS;
use publisher::{EventPublisher, LogPublisher, RedisPublisher};
use store::{CoinStore, MemoryStore};
use util::{fmt_ms, now_ms};
use warmup::WARMUP;

/// Long-lived components shared by every cycle.
struct App {
    config: Config,
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    store: Arc<dyn CoinStore>,
    publisher: Arc<dyn EventPublisher>,
    metadata: RateLimitedMetadataClient,
    collector: KlineCollector,
}

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration and install the logger
// - Build adapters, store, publisher and metadata client
// - Run collection cycles until done or interrupted
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, exactly once and before any TLS client
    // is built.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    // --------------------------------------------------------
    // Load configuration from disk
    //
    // NOTE:
    // - The config file may contain the metadata API key.
    // - It must not be committed to version control.
    // --------------------------------------------------------
    let path = env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = load_config(&path)?;
    config.init_logging();

    log::info!("loaded {} ({} job, {} interval)", path, config.job_name, config.interval);

    let app = build(config)?;

    // --------------------------------------------------------
    // Ctrl-C cancels the running cycle and stops the schedule
    // --------------------------------------------------------
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    loop {
        run_cycle(&app, &shutdown).await;
        log::info!("{}", METRICS.report_line());

        if app.config.schedule_secs == 0 || shutdown.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(Duration::from_secs(app.config.schedule_secs)) => {}
        }
    }

    log::info!("stopped");
    Ok(())
}

fn build(config: Config) -> anyhow::Result<App> {
    // --------------------------------------------------------
    // Adapters, in configured (= fallback) order
    // --------------------------------------------------------
    let mut adapters = Vec::new();
    for exchange_cfg in config.enabled_exchanges() {
        let Some(adapter) = get_adapter(&exchange_cfg.name, exchange_cfg.base_url.as_deref())? else {
            log::warn!("exchange '{}' is not supported, skipped", exchange_cfg.name);
            continue;
        };
        adapters.push(adapter);
    }
    if adapters.is_empty() {
        anyhow::bail!("none of the enabled exchanges is supported (known: {:?})", exchanges::SUPPORTED);
    }

    let store: Arc<dyn CoinStore> = Arc::new(MemoryStore::load(&config.catalogue)?);
    let publisher = build_publisher(&config.publisher)?;
    let metadata = build_metadata_client(&config.metadata)?;

    let collector = KlineCollector::new(
        &config.job_name,
        store.clone(),
        ExchangeFallbackFetcher::new(adapters.clone()),
        publisher.clone(),
        config.max_concurrency,
    );

    Ok(App { config, adapters, store, publisher, metadata, collector })
}

// ------------------------------------------------------------
// Publisher selection
// ------------------------------------------------------------
//
// Demo mode (or no Redis URL) logs events instead of sending.
//
fn build_publisher(cfg: &PublisherConfig) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match (&cfg.redis_url, cfg.demo) {
        (Some(url), false) => {
            log::info!("publishing job events on redis channel {}", cfg.channel);
            Ok(Arc::new(RedisPublisher::new(url, &cfg.channel)?))
        }
        _ => {
            log::info!("DEMO MODE: job events are only logged");
            Ok(Arc::new(LogPublisher))
        }
    }
}

fn build_metadata_client(cfg: &MetadataConfig) -> anyhow::Result<RateLimitedMetadataClient> {
    let provider = CoinGeckoProvider::new(&cfg.base_url, cfg.api_key.as_deref())?;

    Ok(RateLimitedMetadataClient::new(
        Arc::new(provider),
        SlidingWindowLimiter::new(Duration::from_secs(cfg.window_secs), cfg.max_requests),
        Duration::from_secs(cfg.cache_ttl_secs),
    ))
}

// ------------------------------------------------------------
// One cycle
// ------------------------------------------------------------
//
// Order:
// 1. listing sync      (pair -> exchanges)
// 2. market enrichment (snapshots, stablecoin flags, warmup)
// 3. kline collection  (atomic replace + completion event)
//
// Failures of steps 1 and 2 are logged; collection still runs on
// the catalogue as it stands.
//
async fn run_cycle(app: &App, shutdown: &CancellationToken) {
    if let Err(e) = listings::sync_pair_exchanges(app.store.as_ref(), &app.adapters).await {
        log::warn!("listing sync failed: {:#}", e);
    }

    let enricher = MarketEnricher {
        store: app.store.as_ref(),
        client: &app.metadata,
        publisher: app.publisher.as_ref(),
        warmup: &WARMUP,
        batch_size: app.config.metadata.batch_size,
    };
    if let Err(e) = enricher.run().await {
        log::warn!("market enrichment failed: {:#}", e);
    }
    if !WARMUP.is_completed() {
        log::info!("warmup still pending");
    }
    log::debug!("metadata permits used: {}", app.metadata.permits_granted());

    if shutdown.is_cancelled() {
        return;
    }

    let end_time = now_ms();
    let query = KlineQuery {
        interval: app.config.interval,
        start_time: end_time - app.config.lookback_ms(),
        end_time,
        limit: app.config.limit,
    };
    log::debug!("window {} .. {}", fmt_ms(query.start_time), fmt_ms(query.end_time));

    // Run-scoped token: cancelled by shutdown or by the deadline
    let cancel = shutdown.child_token();
    let deadline = app.config.run_timeout_secs.map(|secs| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(secs)).await;
            log::warn!("run exceeded {}s, cancelling", secs);
            cancel.cancel();
        })
    });

    app.collector.run(query, &cancel).await;

    if let Some(deadline) = deadline {
        deadline.abort();
    }
}
