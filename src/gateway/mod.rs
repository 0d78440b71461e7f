//! Historical price gateway abstraction consumed by the history reconstructor.

use crate::domain::{AssetId, AssetPrice};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

pub mod cache;
pub mod coingecko;
pub mod mock;

pub use cache::{CachedPriceGateway, PriceCache};
pub use coingecko::{CoinGeckoConfig, CoinGeckoGateway};
pub use mock::MockPriceGateway;

/// Source of historical prices.
///
/// Implementations own batching, retry/backoff and rate limiting; callers do
/// not retry on their behalf.
#[async_trait]
pub trait PriceGateway: Send + Sync + fmt::Debug {
    /// Fetch prices of `asset_ids` on `date`.
    ///
    /// May return a subset of the requested assets. Callers treat a missing
    /// entry as price 0, not as an error.
    async fn fetch_prices(
        &self,
        date: NaiveDate,
        asset_ids: &[AssetId],
    ) -> Result<Vec<AssetPrice>, GatewayError>;
}

#[async_trait]
impl<G: PriceGateway + ?Sized> PriceGateway for std::sync::Arc<G> {
    async fn fetch_prices(
        &self,
        date: NaiveDate,
        asset_ids: &[AssetId],
    ) -> Result<Vec<AssetPrice>, GatewayError> {
        (**self).fetch_prices(date, asset_ids).await
    }
}

/// Error type for price gateway operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network error (e.g., connection timeout, DNS failure)
    #[error("Network error: {0}")]
    Network(String),
    /// HTTP error (e.g., 5xx server error)
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    #[error("Parse error: {0}")]
    Parse(String),
    /// Rate limit still in force after the configured waits
    #[error("Rate limited")]
    RateLimited,
    #[error("Error: {0}")]
    Other(String),
}
