//! Time-bounded price cache and the gateway decorator that consults it.

use super::{GatewayError, PriceGateway};
use crate::domain::{AssetId, AssetPrice};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    price: AssetPrice,
    inserted_at: Instant,
}

/// Prices keyed by `(date, asset)`, each valid for a fixed TTL after insertion.
#[derive(Debug)]
pub struct PriceCache {
    ttl: Duration,
    entries: Mutex<HashMap<(NaiveDate, AssetId), CacheEntry>>,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached price, or `None` if absent or expired. Expired entries are evicted.
    pub fn get(&self, date: NaiveDate, asset_id: &AssetId) -> Option<AssetPrice> {
        let mut entries = self.lock();
        let key = (date, asset_id.clone());
        let fresh = entries
            .get(&key)
            .map(|entry| entry.inserted_at.elapsed() < self.ttl);
        match fresh {
            Some(true) => entries.get(&key).map(|entry| entry.price.clone()),
            Some(false) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, date: NaiveDate, price: AssetPrice) {
        self.lock().insert(
            (date, price.asset_id.clone()),
            CacheEntry {
                price,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry and return how many were removed.
    pub fn invalidate_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(NaiveDate, AssetId), CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Serves cached prices and forwards only the misses to `inner`.
#[derive(Debug)]
pub struct CachedPriceGateway<G> {
    inner: G,
    cache: Arc<PriceCache>,
}

impl<G: PriceGateway> CachedPriceGateway<G> {
    pub fn new(inner: G, cache: Arc<PriceCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: PriceGateway> PriceGateway for CachedPriceGateway<G> {
    async fn fetch_prices(
        &self,
        date: NaiveDate,
        asset_ids: &[AssetId],
    ) -> Result<Vec<AssetPrice>, GatewayError> {
        let mut prices = Vec::with_capacity(asset_ids.len());
        let mut misses = Vec::new();

        for asset_id in asset_ids {
            match self.cache.get(date, asset_id) {
                Some(price) => prices.push(price),
                None => misses.push(asset_id.clone()),
            }
        }

        debug!(
            "Price cache for {}: {} hits, {} misses",
            date,
            prices.len(),
            misses.len()
        );

        if misses.is_empty() {
            return Ok(prices);
        }

        let fetched = self.inner.fetch_prices(date, &misses).await?;
        for price in &fetched {
            self.cache.insert(date, price.clone());
        }
        prices.extend(fetched);

        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Decimal;
    use crate::gateway::MockPriceGateway;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn quote(id: &str, price: &str) -> AssetPrice {
        AssetPrice::new(AssetId::new(id), id.to_uppercase(), d(price))
    }

    #[test]
    fn test_cache_hit_within_ttl() {
        let cache = PriceCache::new(Duration::from_secs(60));
        cache.insert(date(), quote("bitcoin", "100"));
        assert_eq!(
            cache.get(date(), &AssetId::new("bitcoin")),
            Some(quote("bitcoin", "100"))
        );
        assert_eq!(cache.get(date(), &AssetId::new("ethereum")), None);
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = PriceCache::new(Duration::ZERO);
        cache.insert(date(), quote("bitcoin", "100"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(date(), &AssetId::new("bitcoin")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_expired_and_clear() {
        let expiring = PriceCache::new(Duration::ZERO);
        expiring.insert(date(), quote("bitcoin", "100"));
        expiring.insert(date(), quote("ethereum", "10"));
        assert_eq!(expiring.invalidate_expired(), 2);

        let lasting = PriceCache::new(Duration::from_secs(60));
        lasting.insert(date(), quote("bitcoin", "100"));
        assert_eq!(lasting.invalidate_expired(), 0);
        lasting.clear();
        assert!(lasting.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_only_forwards_misses() {
        let mock = MockPriceGateway::new()
            .with_fixed_price("bitcoin", "btc", d("100"))
            .with_fixed_price("ethereum", "eth", d("10"));
        let cache = Arc::new(PriceCache::new(Duration::from_secs(60)));
        let gateway = CachedPriceGateway::new(mock, cache.clone());

        let first = gateway
            .fetch_prices(date(), &[AssetId::new("bitcoin")])
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let both = gateway
            .fetch_prices(date(), &[AssetId::new("bitcoin"), AssetId::new("ethereum")])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);

        let calls = gateway.inner().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, vec![AssetId::new("ethereum")]);

        let cached = gateway
            .fetch_prices(date(), &[AssetId::new("ethereum")])
            .await
            .unwrap();
        assert_eq!(cached[0].price, d("10"));
        assert_eq!(gateway.inner().call_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_unpriced_misses_are_not_cached() {
        let mock = MockPriceGateway::new();
        let cache = Arc::new(PriceCache::new(Duration::from_secs(60)));
        let gateway = CachedPriceGateway::new(mock, cache.clone());

        let prices = gateway
            .fetch_prices(date(), &[AssetId::new("unknown")])
            .await
            .unwrap();
        assert!(prices.is_empty());
        assert!(cache.is_empty());
    }
}
