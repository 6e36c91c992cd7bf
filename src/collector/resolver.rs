use std::sync::Arc;

use anyhow::Context;

use crate::{
    metrics::{METRICS, RuntimeMetrics},
    schema::{Coin, TradingPair},
    store::CoinStore,
    util::eq_ignore_case,
};

/// What the collector must do before fetching a candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairResolution {
    /// The main coin already trades against this quote.
    Existing(i64),
    /// No such pair yet; it has to be created first.
    NeedsCreation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairAttempt<'a> {
    pub quote: &'a Coin,
    pub resolution: PairResolution,
}

/// Yields one candidate pair per quote coin, most preferred first.
///
/// Pure sequence producer: it never fetches. The caller fetches
/// after each item and stops consuming at the first quote with
/// data, so later quotes are never looked at.
///
/// A quote that is the main coin itself is skipped.
pub struct QuoteCoinResolver<'a> {
    main: &'a Coin,
    quotes: std::slice::Iter<'a, Coin>,
}

impl<'a> QuoteCoinResolver<'a> {
    pub fn new(main: &'a Coin, quotes: &'a [Coin]) -> Self {
        Self { main, quotes: quotes.iter() }
    }
}

impl<'a> Iterator for QuoteCoinResolver<'a> {
    type Item = PairAttempt<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let quote = self.quotes.by_ref().find(|q| q.id != self.main.id)?;

        let resolution = match existing_pair(self.main, quote) {
            Some(pair) => PairResolution::Existing(pair.id),
            None => PairResolution::NeedsCreation,
        };

        Some(PairAttempt { quote, resolution })
    }
}

/// Pair of `main` quoted in `quote`, matched on symbol and name.
fn existing_pair<'a>(main: &'a Coin, quote: &Coin) -> Option<&'a TradingPair> {
    main.trading_pairs.iter().find(|p| {
        eq_ignore_case(&p.quote_symbol, &quote.symbol) && eq_ignore_case(&p.quote_name, &quote.name)
    })
}

/// Materializes missing trading pairs through the store.
///
/// No de-duplication here; concurrent creation of the same pair is
/// the store's problem.
#[derive(Clone)]
pub struct PairCreationGateway {
    store: Arc<dyn CoinStore>,
}

impl PairCreationGateway {
    pub fn new(store: Arc<dyn CoinStore>) -> Self {
        Self { store }
    }

    pub async fn create_pair(&self, main: &Coin, quote: &Coin) -> anyhow::Result<i64> {
        let id = self
            .store
            .create_trading_pair(main.id, quote.id)
            .await
            .with_context(|| format!("creating pair {}/{}", main.symbol, quote.symbol))?;

        RuntimeMetrics::incr(&METRICS.pairs_created);
        log::info!("created trading pair {}/{} (id {})", main.symbol, quote.symbol, id);

        Ok(id)
    }
}
