//! Coin / trading pair / kline store boundary
//!
//! The collector never owns persistence. Everything it needs from
//! storage goes through `CoinStore`:
//! - catalogue reads (coins with pairs, quote priority)
//! - lazy pair creation
//! - the atomic kline snapshot replace
//! - enrichment and listing write-backs
//!
//! Implementations are responsible for serializing concurrent
//! writers of the kline dataset.

pub mod memory;

use async_trait::async_trait;

use crate::schema::{Coin, KlineRow, MarketSnapshot};

pub use memory::MemoryStore;

/// Market data refresh for one coin, produced by the enrichment job.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketUpdate {
    pub coin_id: i64,
    pub external_id: String,
    pub snapshot: MarketSnapshot,
    pub is_stablecoin: bool,
}

/// Exchanges currently listing one trading pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairExchanges {
    pub pair_id: i64,
    pub exchanges: Vec<String>,
}

#[async_trait]
pub trait CoinStore: Send + Sync {
    /// All coins, each with the trading pairs where it is the main coin.
    async fn get_all_coins(&self) -> anyhow::Result<Vec<Coin>>;

    /// Quote coins, most preferred first.
    async fn get_quote_coins_prioritized(&self) -> anyhow::Result<Vec<Coin>>;

    /// Creates the (main, quote) pair and returns its id.
    async fn create_trading_pair(&self, main_coin_id: i64, quote_coin_id: i64) -> anyhow::Result<i64>;

    /// Discards the whole kline dataset and installs `rows`.
    ///
    /// All-or-nothing: on `Err` the previous dataset is untouched.
    async fn replace_all_kline_rows(&self, rows: Vec<KlineRow>) -> anyhow::Result<()>;

    async fn update_market_data(&self, updates: Vec<MarketUpdate>) -> anyhow::Result<()>;

    async fn update_pair_exchanges(&self, updates: Vec<PairExchanges>) -> anyhow::Result<()>;
}
