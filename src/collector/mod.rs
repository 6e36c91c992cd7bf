/// Collector module
///
/// This module groups all logic responsible for:
/// - Resolving (or creating) the trading pair to collect per coin
/// - Querying exchanges in fallback order
/// - Running the catalogue-wide collection and the atomic replace
///
/// The collector layer acts as the orchestration layer between:
/// - Exchange adapters (Binance, Bybit, OKX, …)
/// - The coin store (catalogue in, kline snapshot out)
/// - The event publisher (one completion event per run)
///
/// Design notes:
/// - Exchange-specific logic MUST NOT live here
/// - Storage specifics stay behind `CoinStore`
pub mod fallback;
pub mod resolver;
pub mod runner;
