//! Mock price gateway for testing without network calls.

use super::{GatewayError, PriceGateway};
use crate::domain::{AssetId, AssetPrice, Decimal};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// Gateway that serves predefined prices and records every request.
#[derive(Debug, Default)]
pub struct MockPriceGateway {
    dated: HashMap<(NaiveDate, AssetId), AssetPrice>,
    fixed: HashMap<AssetId, AssetPrice>,
    failing: HashSet<NaiveDate>,
    latency: HashMap<NaiveDate, Duration>,
    calls: Mutex<Vec<(NaiveDate, Vec<AssetId>)>>,
}

impl MockPriceGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price `asset_id` on one specific date.
    pub fn with_price(
        mut self,
        date: NaiveDate,
        asset_id: &str,
        symbol: &str,
        price: Decimal,
    ) -> Self {
        let asset_id = AssetId::new(asset_id);
        self.dated.insert(
            (date, asset_id.clone()),
            AssetPrice::new(asset_id, symbol, price),
        );
        self
    }

    /// Price `asset_id` on every date without a dated entry.
    pub fn with_fixed_price(mut self, asset_id: &str, symbol: &str, price: Decimal) -> Self {
        let asset_id = AssetId::new(asset_id);
        self.fixed
            .insert(asset_id.clone(), AssetPrice::new(asset_id, symbol, price));
        self
    }

    /// Fail every request for `date` with a network error.
    pub fn failing_on(mut self, date: NaiveDate) -> Self {
        self.failing.insert(date);
        self
    }

    /// Delay responses for `date`.
    pub fn with_latency(mut self, date: NaiveDate, latency: Duration) -> Self {
        self.latency.insert(date, latency);
        self
    }

    /// Every request served so far, in arrival order.
    pub fn calls(&self) -> Vec<(NaiveDate, Vec<AssetId>)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl PriceGateway for MockPriceGateway {
    async fn fetch_prices(
        &self,
        date: NaiveDate,
        asset_ids: &[AssetId],
    ) -> Result<Vec<AssetPrice>, GatewayError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((date, asset_ids.to_vec()));

        if let Some(latency) = self.latency.get(&date) {
            tokio::time::sleep(*latency).await;
        }

        if self.failing.contains(&date) {
            return Err(GatewayError::Network(format!("mock failure on {}", date)));
        }

        Ok(asset_ids
            .iter()
            .filter_map(|id| {
                self.dated
                    .get(&(date, id.clone()))
                    .or_else(|| self.fixed.get(id))
                    .cloned()
            })
            .collect())
    }
}
