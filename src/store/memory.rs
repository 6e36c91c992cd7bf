use std::collections::HashSet;
use std::fs;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::schema::{Coin, CoinCategory, KlineRow, TradingPair};
use crate::util::eq_ignore_case;

use super::{CoinStore, MarketUpdate, PairExchanges};

// ------------------------------------------------------------
// Catalogue file
// ------------------------------------------------------------
//
// Seed data for the in-memory store:
//
// {
//   "coins": [ { "id": 1, "symbol": "BTC", "name": "Bitcoin",
//                "trading_pairs": [ ... ] }, ... ],
//   "quote_priority": ["USDT", "USDC", "BTC"]
// }
//
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Catalogue {
    pub coins: Vec<Coin>,

    /// Quote coin symbols, most preferred first
    pub quote_priority: Vec<String>,
}

struct State {
    coins: Vec<Coin>,
    quote_priority: Vec<String>,
    klines: Vec<KlineRow>,
    next_pair_id: i64,
}

/// Process-local `CoinStore`.
///
/// All state sits behind one async `RwLock`; the kline replace
/// validates the new dataset first and then swaps it in under the
/// write lock, so readers see either the old or the new snapshot.
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new(catalogue: Catalogue) -> Self {
        let next_pair_id = catalogue
            .coins
            .iter()
            .flat_map(|c| c.trading_pairs.iter().map(|p| p.id))
            .max()
            .unwrap_or(0)
            + 1;

        Self {
            state: RwLock::new(State {
                coins: catalogue.coins,
                quote_priority: catalogue.quote_priority,
                klines: Vec::new(),
                next_pair_id,
            }),
        }
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalogue {path}"))?;
        let catalogue: Catalogue = serde_json::from_str(&data)
            .with_context(|| format!("invalid catalogue {path}"))?;
        Ok(Self::new(catalogue))
    }

    /// Current kline snapshot.
    #[cfg(test)]
    pub async fn kline_rows(&self) -> Vec<KlineRow> {
        self.state.read().await.klines.clone()
    }
}

#[async_trait]
impl CoinStore for MemoryStore {
    async fn get_all_coins(&self) -> anyhow::Result<Vec<Coin>> {
        Ok(self.state.read().await.coins.clone())
    }

    async fn get_quote_coins_prioritized(&self) -> anyhow::Result<Vec<Coin>> {
        let state = self.state.read().await;

        let mut quotes = Vec::with_capacity(state.quote_priority.len());
        for symbol in &state.quote_priority {
            match state.coins.iter().find(|c| eq_ignore_case(&c.symbol, symbol)) {
                Some(coin) => quotes.push(coin.clone()),
                None => log::warn!("quote coin {} is not in the catalogue", symbol),
            }
        }
        Ok(quotes)
    }

    async fn create_trading_pair(&self, main_coin_id: i64, quote_coin_id: i64) -> anyhow::Result<i64> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let quote = state
            .coins
            .iter()
            .find(|c| c.id == quote_coin_id)
            .cloned()
            .with_context(|| format!("unknown quote coin {quote_coin_id}"))?;

        let main = state
            .coins
            .iter_mut()
            .find(|c| c.id == main_coin_id)
            .with_context(|| format!("unknown main coin {main_coin_id}"))?;

        // one pair per (main, quote)
        if let Some(existing) = main.trading_pairs.iter().find(|p| p.quote_coin_id == quote_coin_id) {
            return Ok(existing.id);
        }

        let id = state.next_pair_id;
        state.next_pair_id += 1;

        main.trading_pairs.push(TradingPair {
            id,
            quote_coin_id,
            quote_symbol: quote.symbol,
            quote_name: quote.name,
            exchanges: Vec::new(),
        });

        Ok(id)
    }

    async fn replace_all_kline_rows(&self, rows: Vec<KlineRow>) -> anyhow::Result<()> {
        let mut state = self.state.write().await;

        let known: HashSet<i64> = state
            .coins
            .iter()
            .flat_map(|c| c.trading_pairs.iter().map(|p| p.id))
            .collect();

        let mut keys = HashSet::with_capacity(rows.len());
        for row in &rows {
            if !known.contains(&row.trading_pair_id) {
                anyhow::bail!("kline row references unknown trading pair {}", row.trading_pair_id);
            }
            if !keys.insert((row.trading_pair_id, row.open_time)) {
                anyhow::bail!(
                    "duplicate kline row for pair {} at {}",
                    row.trading_pair_id,
                    row.open_time
                );
            }
        }

        state.klines = rows;
        Ok(())
    }

    async fn update_market_data(&self, updates: Vec<MarketUpdate>) -> anyhow::Result<()> {
        let mut state = self.state.write().await;

        for update in updates {
            let Some(coin) = state.coins.iter_mut().find(|c| c.id == update.coin_id) else {
                log::warn!("market update for unknown coin {}", update.coin_id);
                continue;
            };

            coin.external_id = Some(update.external_id);
            coin.market = Some(update.snapshot);
            if update.is_stablecoin {
                coin.category = Some(CoinCategory::Stablecoin);
            }
        }
        Ok(())
    }

    async fn update_pair_exchanges(&self, updates: Vec<PairExchanges>) -> anyhow::Result<()> {
        let mut state = self.state.write().await;

        for update in updates {
            let pair = state
                .coins
                .iter_mut()
                .flat_map(|c| c.trading_pairs.iter_mut())
                .find(|p| p.id == update.pair_id);

            match pair {
                Some(pair) => pair.exchanges = update.exchanges,
                None => log::warn!("exchange update for unknown pair {}", update.pair_id),
            }
        }
        Ok(())
    }
}
