use thiserror::Error;

/// Run-level failure of a kline collection.
///
/// Only these escalate to a failed run. Per-coin problems (no data,
/// exchange errors, pair creation failures) are absorbed by the
/// collector and never surface here.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to load catalogue: {0:#}")]
    CatalogueLoad(anyhow::Error),

    #[error("atomic kline replace failed: {0:#}")]
    Replace(anyhow::Error),

    #[error("cancelled")]
    Cancelled,
}

/// Failure of a metadata enrichment request.
///
/// Either half failing fails the whole request: price data without a
/// stablecoin flag is never returned.
#[derive(Error, Debug, Clone)]
pub enum MetadataError {
    #[error("market data request failed: {0}")]
    Upstream(String),

    #[error("stablecoin classification request failed: {0}")]
    Stablecoins(String),
}
