use std::fs;

use anyhow::Context;
use log::LevelFilter;
use serde::Deserialize;

use crate::collector::runner::DEFAULT_MAX_CONCURRENCY;
use crate::enrichment::DEFAULT_BATCH_SIZE;
use crate::metadata::coingecko;
use crate::schema::Interval;

/// Upper bound for rows per pair and run.
pub const MAX_LIMIT: usize = 1000;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level structure loaded from `config.json`.
//
// It defines:
// - What to collect (interval, limit, lookback)
// - Where to collect from (exchanges, in fallback order)
// - How often, and how much in parallel
// - Metadata provider and event publisher settings
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Name carried by every completion event
    #[serde(default = "default_job_name")]
    pub job_name: String,

    #[serde(default = "default_interval")]
    pub interval: Interval,

    /// Rows per pair (capped at `MAX_LIMIT`)
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Collection window; defaults to `interval * limit`
    pub lookback_ms: Option<i64>,

    /// Exchange list; the order is the fallback order
    pub exchanges: Vec<ExchangeConfig>,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Hard deadline for one collection run
    pub run_timeout_secs: Option<u64>,

    /// Seconds between cycles (0 = run once and exit)
    #[serde(default)]
    pub schedule_secs: u64,

    /// JSON catalogue seeding the in-memory store
    pub catalogue: String,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

// ------------------------------------------------------------
// Exchange configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    /// Exchange identifier (e.g. "gateio", "binance", "okx")
    pub name: String,

    /// Enables or disables this exchange at runtime
    pub enabled: bool,

    /// REST base URL override (proxy, mirror)
    pub base_url: Option<String>,
}

// ------------------------------------------------------------
// Metadata provider configuration
// ------------------------------------------------------------
//
// Notes:
// - `api_key` is security-sensitive and must never be committed.
// - `max_requests` per `window_secs` is enforced client-side,
//   independent of the provider's own quota.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetadataConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub window_secs: u64,
    pub max_requests: usize,
    pub cache_ttl_secs: u64,

    /// Provider ids per market data request
    pub batch_size: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: coingecko::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            window_secs: 60,
            max_requests: 30,
            cache_ttl_secs: 300,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

// ------------------------------------------------------------
// Publisher configuration
// ------------------------------------------------------------
//
// `demo` (or a missing `redis_url`) only logs events.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PublisherConfig {
    pub redis_url: Option<String>,
    pub channel: String,
    pub demo: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel: "job-events".to_string(),
            demo: false,
        }
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Raises the default log level to `debug`
    pub log: Option<bool>,
}

fn default_job_name() -> String {
    "kline-collection".to_string()
}

fn default_interval() -> Interval {
    Interval::D1
}

fn default_limit() -> usize {
    MAX_LIMIT
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl Config {
    pub fn debug_log(&self) -> bool {
        self.debug.as_ref().is_some_and(|d| d.log.unwrap_or(false))
    }

    pub fn enabled_exchanges(&self) -> impl Iterator<Item = &ExchangeConfig> {
        self.exchanges.iter().filter(|e| e.enabled)
    }

    /// Installs the global logger.
    ///
    /// `debug.log` picks the default level; `RUST_LOG` overrides it.
    pub fn init_logging(&self) {
        let level = if self.debug_log() { LevelFilter::Debug } else { LevelFilter::Info };

        env_logger::Builder::new()
            .filter_level(level)
            .parse_env(env_logger::Env::default())
            .init();
    }

    /// Collection window in milliseconds.
    pub fn lookback_ms(&self) -> i64 {
        self.lookback_ms
            .unwrap_or_else(|| self.interval.duration_ms() * self.limit as i64)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.enabled_exchanges().next().is_none() {
            anyhow::bail!("no enabled exchange configured");
        }
        if self.limit == 0 {
            anyhow::bail!("limit must be at least 1");
        }
        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }
        if self.metadata.max_requests == 0 || self.metadata.window_secs == 0 {
            anyhow::bail!("metadata rate limit must allow at least one request per window");
        }
        if self.metadata.batch_size == 0 || self.metadata.batch_size > coingecko::MAX_IDS_PER_REQUEST {
            anyhow::bail!(
                "metadata batch_size must be within 1..={}",
                coingecko::MAX_IDS_PER_REQUEST
            );
        }
        if self.lookback_ms.is_some_and(|ms| ms <= 0) {
            anyhow::bail!("lookback_ms must be positive");
        }
        Ok(())
    }
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads the JSON file, caps the limit and validates semantics.
//
pub fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {path}"))?;
    parse_config(&data).with_context(|| format!("invalid config {path}"))
}

fn parse_config(data: &str) -> anyhow::Result<Config> {
    let mut cfg: Config = serde_json::from_str(data)?;

    // runs before the logger exists, so capping is silent
    cfg.limit = cfg.limit.min(MAX_LIMIT);

    cfg.validate()?;
    Ok(cfg)
}
