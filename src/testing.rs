//! In-process fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::exchanges::adapter::{ExchangeAdapter, KlineQuery};
use crate::metadata::{MarketQuote, MetadataProvider, ProviderCoin};
use crate::publisher::{EventPublisher, JobEvent};
use crate::schema::{Coin, CoinCategory, KlineRow, SpotListing, TradingPair};
use crate::store::memory::Catalogue;
use crate::store::{CoinStore, MarketUpdate, MemoryStore, PairExchanges};

// ------------------------------------------------------------
// Catalogue fixtures
// ------------------------------------------------------------

pub fn coin(id: i64, symbol: &str, name: &str) -> Coin {
    Coin {
        id,
        symbol: symbol.to_string(),
        name: name.to_string(),
        category: None,
        external_id: None,
        market: None,
        trading_pairs: Vec::new(),
    }
}

pub fn stablecoin(id: i64, symbol: &str, name: &str) -> Coin {
    Coin { category: Some(CoinCategory::Stablecoin), ..coin(id, symbol, name) }
}

pub fn pair(id: i64, quote: &Coin) -> TradingPair {
    TradingPair {
        id,
        quote_coin_id: quote.id,
        quote_symbol: quote.symbol.clone(),
        quote_name: quote.name.clone(),
        exchanges: Vec::new(),
    }
}

/// BTC (1) with BTC/USDT as pair 100, ETH (2) without pairs,
/// USDT (10) and USDC (11) as stablecoin quotes.
pub fn catalogue() -> Catalogue {
    let usdt = stablecoin(10, "USDT", "Tether");
    let usdc = stablecoin(11, "USDC", "USD Coin");

    let mut btc = coin(1, "BTC", "Bitcoin");
    btc.trading_pairs.push(pair(100, &usdt));

    Catalogue {
        coins: vec![btc, coin(2, "ETH", "Ethereum"), usdt, usdc],
        quote_priority: vec!["USDT".into(), "USDC".into()],
    }
}

/// Stored-form row of `pair_id` opening at `open_time`.
pub fn kline(pair_id: i64, open_time: i64) -> KlineRow {
    KlineRow {
        trading_pair_id: pair_id,
        ..raw_kline(open_time)
    }
}

/// Adapter-form row (not yet tagged with a pair).
pub fn raw_kline(open_time: i64) -> KlineRow {
    KlineRow {
        trading_pair_id: 0,
        open_time,
        open: "1.0".into(),
        high: "2.0".into(),
        low: "0.5".into(),
        close: "1.5".into(),
        volume: "100".into(),
        close_time: open_time + 59_999,
    }
}

/// `count` consecutive one-minute adapter rows.
pub fn raw_klines(count: usize) -> Vec<KlineRow> {
    (0..count as i64).map(|i| raw_kline(i * 60_000)).collect()
}

// ------------------------------------------------------------
// Scripted exchange
// ------------------------------------------------------------
//
// Answers per "BASE/QUOTE" key; unknown pairs return an empty
// result. Every fetch is recorded in call order.
//
pub struct ScriptedAdapter {
    name: &'static str,
    klines: HashMap<String, Result<Vec<KlineRow>, String>>,
    listings: Result<Vec<SpotListing>, String>,
    panic_on: Option<String>,
    delay: Option<Duration>,
    hang: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            klines: HashMap::new(),
            listings: Ok(Vec::new()),
            panic_on: None,
            delay: None,
            hang: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_klines(mut self, pair: &str, rows: Vec<KlineRow>) -> Self {
        self.klines.insert(pair.to_string(), Ok(rows));
        self
    }

    pub fn with_error(mut self, pair: &str, error: &str) -> Self {
        self.klines.insert(pair.to_string(), Err(error.to_string()));
        self
    }

    pub fn with_listing(mut self, base: &str, quote: &str) -> Self {
        if let Ok(listings) = &mut self.listings {
            listings.push(SpotListing {
                exchange: self.name.to_string(),
                base: base.to_string(),
                quote: quote.to_string(),
            });
        }
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.listings = Err("listing endpoint down".into());
        self
    }

    pub fn panicking_on(mut self, pair: &str) -> Self {
        self.panic_on = Some(pair.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every fetch waits forever.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch_klines(
        &self,
        base: &str,
        quote: &str,
        _query: &KlineQuery,
    ) -> anyhow::Result<Vec<KlineRow>> {
        let key = format!("{base}/{quote}");
        self.calls.lock().unwrap().push(key.clone());

        if self.panic_on.as_deref() == Some(key.as_str()) {
            panic!("scripted panic for {key}");
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.klines.get(&key) {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(e)) => Err(anyhow::anyhow!("{e}")),
            None => Ok(Vec::new()),
        }
    }

    async fn list_spot_coins(&self) -> anyhow::Result<Vec<SpotListing>> {
        self.listings.clone().map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Upcasts scripted adapters into the order-preserving exchange list.
pub fn exchanges(list: &[&Arc<ScriptedAdapter>]) -> Vec<Arc<dyn ExchangeAdapter>> {
    list.iter().map(|a| Arc::clone(*a) as Arc<dyn ExchangeAdapter>).collect()
}

// ------------------------------------------------------------
// Recording publisher
// ------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<JobEvent>>,
    fail: bool,
}

impl RecordingPublisher {
    /// Records the event, then reports a broker failure.
    pub fn failing() -> Self {
        Self { events: Mutex::new(Vec::new()), fail: true }
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &JobEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            anyhow::bail!("broker unavailable");
        }
        Ok(())
    }
}

// ------------------------------------------------------------
// Failing store
// ------------------------------------------------------------
//
// Wraps a MemoryStore and injects failures into selected
// operations. Replace attempts are counted even when injected
// to fail.
//
#[derive(Default)]
pub struct Faults {
    pub load: bool,
    pub replace: bool,
    pub create_for_main: Option<i64>,
}

pub struct FailingStore {
    pub inner: MemoryStore,
    faults: Faults,
    replace_calls: AtomicUsize,
}

impl FailingStore {
    pub fn new(catalogue: Catalogue, faults: Faults) -> Self {
        Self { inner: MemoryStore::new(catalogue), faults, replace_calls: AtomicUsize::new(0) }
    }

    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoinStore for FailingStore {
    async fn get_all_coins(&self) -> anyhow::Result<Vec<Coin>> {
        if self.faults.load {
            anyhow::bail!("database unavailable");
        }
        self.inner.get_all_coins().await
    }

    async fn get_quote_coins_prioritized(&self) -> anyhow::Result<Vec<Coin>> {
        if self.faults.load {
            anyhow::bail!("database unavailable");
        }
        self.inner.get_quote_coins_prioritized().await
    }

    async fn create_trading_pair(&self, main_coin_id: i64, quote_coin_id: i64) -> anyhow::Result<i64> {
        if self.faults.create_for_main == Some(main_coin_id) {
            anyhow::bail!("constraint violation");
        }
        self.inner.create_trading_pair(main_coin_id, quote_coin_id).await
    }

    async fn replace_all_kline_rows(&self, rows: Vec<KlineRow>) -> anyhow::Result<()> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.replace {
            anyhow::bail!("transaction aborted");
        }
        self.inner.replace_all_kline_rows(rows).await
    }

    async fn update_market_data(&self, updates: Vec<MarketUpdate>) -> anyhow::Result<()> {
        self.inner.update_market_data(updates).await
    }

    async fn update_pair_exchanges(&self, updates: Vec<PairExchanges>) -> anyhow::Result<()> {
        self.inner.update_pair_exchanges(updates).await
    }
}

// ------------------------------------------------------------
// Scripted metadata provider
// ------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedProvider {
    pub quotes: HashMap<String, MarketQuote>,
    pub stablecoins: HashSet<String>,
    pub coin_list: Vec<ProviderCoin>,
    pub fail_markets: bool,
    pub fail_stablecoins: bool,
    pub delay: Option<Duration>,
    pub market_calls: AtomicUsize,
    pub stablecoin_calls: AtomicUsize,
    pub coin_list_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn with_quote(mut self, id: &str, price: f64) -> Self {
        self.quotes.insert(
            id.to_string(),
            MarketQuote {
                id: id.to_string(),
                price_usd: Some(price),
                market_cap_usd: Some(price * 1_000.0),
                change_24h: Some(0.5),
            },
        );
        self
    }

    pub fn with_stablecoin(mut self, id: &str) -> Self {
        self.stablecoins.insert(id.to_string());
        self
    }

    pub fn with_listed(mut self, id: &str, symbol: &str, name: &str) -> Self {
        self.coin_list.push(ProviderCoin {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn market_calls(&self) -> usize {
        self.market_calls.load(Ordering::SeqCst)
    }

    pub fn stablecoin_calls(&self) -> usize {
        self.stablecoin_calls.load(Ordering::SeqCst)
    }

    pub fn coin_list_calls(&self) -> usize {
        self.coin_list_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MetadataProvider for ScriptedProvider {
    async fn get_assets_info(&self, ids: &[String]) -> anyhow::Result<Vec<MarketQuote>> {
        self.market_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_markets {
            anyhow::bail!("markets endpoint returned 500");
        }
        Ok(ids.iter().filter_map(|id| self.quotes.get(id).cloned()).collect())
    }

    async fn get_stablecoin_ids(&self, ids: &[String]) -> anyhow::Result<HashSet<String>> {
        self.stablecoin_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_stablecoins {
            anyhow::bail!("category endpoint returned 500");
        }
        Ok(ids.iter().filter(|id| self.stablecoins.contains(*id)).cloned().collect())
    }

    async fn get_coin_list(&self) -> anyhow::Result<Vec<ProviderCoin>> {
        self.coin_list_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.coin_list.clone())
    }
}

// ------------------------------------------------------------
// Log capture
// ------------------------------------------------------------
//
// Records log lines per thread. `#[tokio::test]` runs on a
// current-thread runtime, so spawned tasks log into the same
// buffer as the test body.
//
struct CaptureLogger;

thread_local! {
    static CAPTURED: std::cell::RefCell<Vec<(log::Level, String)>> =
        const { std::cell::RefCell::new(Vec::new()) };
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let line = record.args().to_string();
        CAPTURED.with(|c| c.borrow_mut().push((record.level(), line)));
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;

/// Installs the capturing logger (once per process) and clears this
/// thread's buffer.
pub fn capture_logs() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        let _ = log::set_logger(&CAPTURE_LOGGER);
        log::set_max_level(log::LevelFilter::Trace);
    });
    CAPTURED.with(|c| c.borrow_mut().clear());
}

/// Lines logged at `level` on this thread since `capture_logs`.
pub fn logged_at(level: log::Level) -> Vec<String> {
    CAPTURED.with(|c| {
        c.borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    })
}
