//! Day-by-day portfolio valuation replayed from the transaction history.
//!
//! Every day is recomputed from the full transaction prefix up to the end of
//! that day. Nothing is carried over from the previous day, so days can be
//! resolved concurrently and the output never accumulates drift.

use crate::domain::{chronological, AssetId, Decimal, DisposalMethod, TimeMs, Transaction};
use crate::error::EngineError;
use crate::gateway::PriceGateway;
use chrono::{Days, NaiveDate, Utc};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{checked, fold_average_cost, fold_lots, DisposalEngine, HistoryFold, Position};

/// Valuation of the whole portfolio on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalDataPoint {
    /// Midnight UTC of `date`.
    pub timestamp: TimeMs,
    pub date: NaiveDate,
    pub total_value: Decimal,
    pub total_cost: Decimal,
    pub total_pnl: Decimal,
    /// Return on cost in percent; zero when there is no cost basis.
    pub roi: Decimal,
}

impl HistoricalDataPoint {
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            timestamp: TimeMs::start_of_day(date),
            date,
            total_value: Decimal::zero(),
            total_cost: Decimal::zero(),
            total_pnl: Decimal::zero(),
            roi: Decimal::zero(),
        }
    }

    pub fn from_totals(
        date: NaiveDate,
        total_value: Decimal,
        total_cost: Decimal,
    ) -> Result<Self, EngineError> {
        let total_pnl = checked(total_value.checked_sub(total_cost), || {
            format!("total P&L on {}", date)
        })?;
        let roi = if total_cost.is_positive() {
            checked(
                total_pnl
                    .checked_div(total_cost)
                    .and_then(|ratio| ratio.checked_mul(Decimal::hundred())),
                || format!("ROI on {}", date),
            )?
        } else {
            Decimal::zero()
        };

        Ok(Self {
            timestamp: TimeMs::start_of_day(date),
            date,
            total_value,
            total_cost,
            total_pnl,
            roi,
        })
    }
}

/// Builds valuation time series from transactions and a price gateway.
#[derive(Debug, Clone)]
pub struct HistoryReconstructor {
    engine: DisposalEngine,
    fold: HistoryFold,
    concurrency: usize,
    assets: Option<BTreeSet<AssetId>>,
}

impl HistoryReconstructor {
    pub fn new(method: DisposalMethod) -> Self {
        Self {
            engine: DisposalEngine::new(method),
            fold: HistoryFold::AverageCost,
            concurrency: 1,
            assets: None,
        }
    }

    /// Engine used by [`HistoryFold::Lots`].
    pub fn with_engine(mut self, engine: DisposalEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_fold(mut self, fold: HistoryFold) -> Self {
        self.fold = fold;
        self
    }

    /// Maximum number of days priced at once. Values below 1 are treated as 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Value only the listed assets. An empty list keeps every asset.
    pub fn with_assets(mut self, assets: impl IntoIterator<Item = AssetId>) -> Self {
        let assets: BTreeSet<AssetId> = assets.into_iter().collect();
        self.assets = if assets.is_empty() { None } else { Some(assets) };
        self
    }

    pub fn engine(&self) -> &DisposalEngine {
        &self.engine
    }

    pub fn fold(&self) -> HistoryFold {
        self.fold
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Asset allow-list, if one is set.
    pub fn assets(&self) -> Option<&BTreeSet<AssetId>> {
        self.assets.as_ref()
    }

    /// Build `days` points ending today (UTC).
    pub async fn build<G>(
        &self,
        transactions: &[Transaction],
        days: usize,
        gateway: &G,
    ) -> Result<Vec<HistoricalDataPoint>, EngineError>
    where
        G: PriceGateway + ?Sized,
    {
        self.build_as_of(transactions, days, Utc::now().date_naive(), gateway)
            .await
    }

    /// Build `days` points covering `[as_of - (days - 1), as_of]`, oldest first.
    pub async fn build_as_of<G>(
        &self,
        transactions: &[Transaction],
        days: usize,
        as_of: NaiveDate,
        gateway: &G,
    ) -> Result<Vec<HistoricalDataPoint>, EngineError>
    where
        G: PriceGateway + ?Sized,
    {
        let points: Vec<HistoricalDataPoint> = self
            .stream(transactions, days, as_of, gateway)
            .try_collect()
            .await?;

        info!(
            "Built {} history points through {} (fold={:?}, method={})",
            points.len(),
            as_of,
            self.fold,
            self.engine.method
        );

        Ok(points)
    }

    /// Lazily resolve one point per day, oldest first.
    ///
    /// A point is yielded only once its day is fully priced, so dropping the
    /// stream cancels the build without ever exposing a partial snapshot.
    pub fn stream<'a, G>(
        &'a self,
        transactions: &'a [Transaction],
        days: usize,
        as_of: NaiveDate,
        gateway: &'a G,
    ) -> impl Stream<Item = Result<HistoricalDataPoint, EngineError>> + 'a
    where
        G: PriceGateway + ?Sized,
    {
        let sorted: Vec<&Transaction> = chronological(transactions)
            .into_iter()
            .filter(|tx| self.includes(tx.asset_id()))
            .collect();
        let sorted = Arc::new(sorted);

        stream::iter(window(as_of, days))
            .map(move |date| {
                let sorted = Arc::clone(&sorted);
                async move { self.snapshot(&sorted, date, gateway).await }
            })
            .buffered(self.concurrency)
    }

    fn includes(&self, asset_id: &AssetId) -> bool {
        self.assets
            .as_ref()
            .map_or(true, |assets| assets.contains(asset_id))
    }

    async fn snapshot<G>(
        &self,
        sorted: &[&Transaction],
        date: NaiveDate,
        gateway: &G,
    ) -> Result<HistoricalDataPoint, EngineError>
    where
        G: PriceGateway + ?Sized,
    {
        let cutoff = TimeMs::end_of_day(date);
        let prefix_len = sorted.partition_point(|tx| tx.timestamp() <= cutoff);
        let prefix = sorted[..prefix_len].iter().copied();

        let positions = match self.fold {
            HistoryFold::AverageCost => fold_average_cost(prefix)?,
            HistoryFold::Lots => fold_lots(prefix, &self.engine)?,
        };

        let active: Vec<&Position> = positions.values().filter(|p| p.is_open()).collect();
        if active.is_empty() {
            debug!("No open positions on {}", date);
            return Ok(HistoricalDataPoint::zero(date));
        }

        let asset_ids: Vec<AssetId> = active.iter().map(|p| p.asset_id.clone()).collect();
        debug!("Pricing {} assets for {}", asset_ids.len(), date);
        let quotes = gateway.fetch_prices(date, &asset_ids).await?;
        let prices: HashMap<&AssetId, Decimal> =
            quotes.iter().map(|q| (&q.asset_id, q.price)).collect();

        let mut total_value = Decimal::zero();
        let mut total_cost = Decimal::zero();
        for position in active {
            let price = match prices.get(&position.asset_id) {
                Some(price) => *price,
                None => {
                    warn!(
                        "Missing price for {} on {}; valuing at 0",
                        position.asset_id, date
                    );
                    Decimal::zero()
                }
            };
            total_value = checked(
                position
                    .quantity
                    .checked_mul(price)
                    .and_then(|value| total_value.checked_add(value)),
                || format!("portfolio value on {}", date),
            )?;
            total_cost = checked(total_cost.checked_add(position.total_cost), || {
                format!("portfolio cost on {}", date)
            })?;
        }

        HistoricalDataPoint::from_totals(date, total_value, total_cost)
    }
}

/// Entry point used by the charting/reporting layer.
pub async fn build_history<G>(
    transactions: &[Transaction],
    days: usize,
    method: DisposalMethod,
    gateway: &G,
) -> Result<Vec<HistoricalDataPoint>, EngineError>
where
    G: PriceGateway + ?Sized,
{
    HistoryReconstructor::new(method)
        .build(transactions, days, gateway)
        .await
}

/// [`build_history`] with a fixed last day instead of today.
pub async fn build_history_as_of<G>(
    transactions: &[Transaction],
    days: usize,
    method: DisposalMethod,
    as_of: NaiveDate,
    gateway: &G,
) -> Result<Vec<HistoricalDataPoint>, EngineError>
where
    G: PriceGateway + ?Sized,
{
    HistoryReconstructor::new(method)
        .build_as_of(transactions, days, as_of, gateway)
        .await
}

/// Calendar days `[as_of - (days - 1), as_of]`, oldest first.
fn window(as_of: NaiveDate, days: usize) -> Vec<NaiveDate> {
    (0..days)
        .rev()
        .filter_map(|offset| as_of.checked_sub_days(Days::new(offset as u64)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn date(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_window_is_ascending_and_inclusive() {
        let days = window(date(2024, 3, 2), 3);
        assert_eq!(days, vec![date(2024, 2, 29), date(2024, 3, 1), date(2024, 3, 2)]);
        assert!(window(date(2024, 3, 2), 0).is_empty());
    }

    #[test]
    fn test_point_derivations() {
        let point =
            HistoricalDataPoint::from_totals(date(2024, 1, 1), d("150"), d("100")).unwrap();
        assert_eq!(point.total_pnl, d("50"));
        assert_eq!(point.roi, d("50"));
        assert_eq!(point.timestamp, TimeMs::start_of_day(date(2024, 1, 1)));

        let free =
            HistoricalDataPoint::from_totals(date(2024, 1, 1), d("20"), Decimal::zero()).unwrap();
        assert_eq!(free.total_pnl, d("20"));
        assert_eq!(free.roi, Decimal::zero());
    }

    #[test]
    fn test_point_serializes_camel_case() {
        let value = serde_json::to_value(HistoricalDataPoint::zero(date(2024, 1, 1))).unwrap();
        assert_eq!(value["date"], "2024-01-01");
        assert!(value.get("totalValue").is_some());
        assert!(value.get("totalPnl").is_some());
    }

    #[test]
    fn test_roi_overflow_is_an_error() {
        let tiny_cost = d("0.0000000000000000000000000001");
        let result = HistoricalDataPoint::from_totals(date(2024, 1, 1), d("1000"), tiny_cost);
        assert!(matches!(result, Err(EngineError::Overflow(_))));
    }

    #[test]
    fn test_concurrency_floor() {
        let reconstructor = HistoryReconstructor::new(DisposalMethod::Fifo).with_concurrency(0);
        assert_eq!(reconstructor.concurrency(), 1);
    }

    #[test]
    fn test_empty_asset_list_keeps_everything() {
        let reconstructor = HistoryReconstructor::new(DisposalMethod::Fifo).with_assets(Vec::new());
        assert!(reconstructor.assets().is_none());
        assert!(reconstructor.includes(&AssetId::new("bitcoin")));

        let reconstructor = reconstructor.with_assets([AssetId::new("ethereum")]);
        assert!(!reconstructor.includes(&AssetId::new("bitcoin")));
        assert!(reconstructor.includes(&AssetId::new("ethereum")));
    }
}
