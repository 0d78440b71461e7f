//! CoinGecko historical price client.

use super::{GatewayError, PriceGateway};
use crate::domain::{AssetId, AssetPrice, Decimal};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::NaiveDate;
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Request pacing for [`CoinGeckoGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    pub vs_currency: String,
    /// Assets requested together before pausing.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub batch_delay: Duration,
    /// Wait after a 429 before retrying the rate-limited part of a batch.
    pub rate_limit_wait: Duration,
    pub max_rate_limit_retries: u32,
    /// Upper bound on outbound requests in flight across all callers.
    pub max_in_flight: usize,
    /// Retry window for transient network and 5xx failures.
    pub transient_retry_window: Duration,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            vs_currency: "usd".to_string(),
            batch_size: 5,
            batch_delay: Duration::from_millis(1_000),
            rate_limit_wait: Duration::from_secs(60),
            max_rate_limit_retries: 3,
            max_in_flight: 5,
            transient_retry_window: Duration::from_secs(30),
        }
    }
}

/// Price gateway backed by the public `/coins/{id}/history` endpoint.
#[derive(Debug, Clone)]
pub struct CoinGeckoGateway {
    client: Client,
    config: CoinGeckoConfig,
    permits: Arc<Semaphore>,
}

impl CoinGeckoGateway {
    pub fn new(config: CoinGeckoConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            client: Client::new(),
            config,
            permits,
        }
    }

    /// Create with the default public API URL and pacing.
    pub fn default_url() -> Self {
        Self::new(CoinGeckoConfig::default())
    }

    pub fn config(&self) -> &CoinGeckoConfig {
        &self.config
    }

    /// Fetch one batch, waiting out rate limits for the assets that hit them.
    async fn fetch_batch(
        &self,
        date: NaiveDate,
        batch: &[AssetId],
    ) -> Result<Vec<AssetPrice>, GatewayError> {
        let mut prices = Vec::with_capacity(batch.len());
        let mut pending: Vec<&AssetId> = batch.iter().collect();
        let mut attempt = 0;

        loop {
            let results = join_all(pending.iter().map(|id| self.fetch_one(date, id))).await;

            let mut limited = Vec::new();
            for (asset_id, result) in pending.into_iter().zip(results) {
                match result {
                    Ok(Some(price)) => prices.push(price),
                    Ok(None) => debug!("No price for {} on {}", asset_id, date),
                    Err(GatewayError::RateLimited) => limited.push(asset_id),
                    Err(e) => return Err(e),
                }
            }

            if limited.is_empty() {
                return Ok(prices);
            }
            if attempt >= self.config.max_rate_limit_retries {
                return Err(GatewayError::RateLimited);
            }
            attempt += 1;

            warn!(
                "Rate limited on {} assets for {}; waiting {:?} (retry {}/{})",
                limited.len(),
                date,
                self.config.rate_limit_wait,
                attempt,
                self.config.max_rate_limit_retries
            );
            tokio::time::sleep(self.config.rate_limit_wait).await;
            pending = limited;
        }
    }

    async fn fetch_one(
        &self,
        date: NaiveDate,
        asset_id: &AssetId,
    ) -> Result<Option<AssetPrice>, GatewayError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| GatewayError::Other(e.to_string()))?;

        let url = format!("{}/coins/{}/history", self.config.base_url, asset_id);
        let date_param = date.format("%d-%m-%Y").to_string();
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.transient_retry_window),
            ..Default::default()
        };

        debug!("Fetching {} price for {} on {}", self.config.vs_currency, asset_id, date);

        let body = retry(backoff, || async {
            let response = self
                .client
                .get(&url)
                .query(&[("date", date_param.as_str()), ("localization", "false")])
                .send()
                .await
                .map_err(|e| backoff::Error::transient(GatewayError::Network(e.to_string())))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(backoff::Error::permanent(GatewayError::RateLimited));
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(GatewayError::Http {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(GatewayError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map(Some)
                .map_err(|e| backoff::Error::permanent(GatewayError::Parse(e.to_string())))
        })
        .await?;

        match body {
            Some(body) => parse_history(&body, asset_id, &self.config.vs_currency),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PriceGateway for CoinGeckoGateway {
    async fn fetch_prices(
        &self,
        date: NaiveDate,
        asset_ids: &[AssetId],
    ) -> Result<Vec<AssetPrice>, GatewayError> {
        let mut prices = Vec::with_capacity(asset_ids.len());

        for (index, batch) in asset_ids.chunks(self.config.batch_size.max(1)).enumerate() {
            if index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
            prices.extend(self.fetch_batch(date, batch).await?);
        }

        Ok(prices)
    }
}

/// Extract `market_data.current_price.<vs_currency>` from a history response.
///
/// Responses without market data (e.g., dates before listing) yield `None`.
fn parse_history(
    body: &serde_json::Value,
    asset_id: &AssetId,
    vs_currency: &str,
) -> Result<Option<AssetPrice>, GatewayError> {
    if !body.is_object() {
        return Err(GatewayError::Parse("Expected object response".to_string()));
    }

    let Some(raw) = body
        .get("market_data")
        .and_then(|m| m.get("current_price"))
        .and_then(|p| p.get(vs_currency))
    else {
        return Ok(None);
    };

    let serde_json::Value::Number(number) = raw else {
        return Err(GatewayError::Parse(format!(
            "Invalid price for {}: {}",
            asset_id, raw
        )));
    };
    let price = Decimal::from_str_canonical(&number.to_string())
        .ok()
        .or_else(|| number.as_f64().and_then(Decimal::from_f64))
        .ok_or_else(|| GatewayError::Parse(format!("Invalid price for {}: {}", asset_id, raw)))?;

    let symbol = body
        .get("symbol")
        .and_then(|s| s.as_str())
        .unwrap_or(asset_id.as_str());

    Ok(Some(AssetPrice::new(asset_id.clone(), symbol, price)))
}
