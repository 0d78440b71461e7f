use crate::domain::{chronological, AssetId, Decimal, DisposalMethod, Transaction};
use crate::error::EngineError;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

use super::{checked, is_dust, Lot, PnLResult};

/// What to do when a disposal exceeds the open inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShortfallPolicy {
    /// Fail with `EngineError::InsufficientInventory`.
    #[default]
    Reject,
    /// Match what is available and report the rest in `PnLResult::unmatched_quantity`.
    Truncate,
}

/// Lot-matching engine for one asset's transaction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisposalEngine {
    pub method: DisposalMethod,
    pub include_fees: bool,
    pub shortfall: ShortfallPolicy,
}

impl DisposalEngine {
    pub fn new(method: DisposalMethod) -> Self {
        Self {
            method,
            include_fees: true,
            shortfall: ShortfallPolicy::Reject,
        }
    }

    pub fn with_fees(mut self, include_fees: bool) -> Self {
        self.include_fees = include_fees;
        self
    }

    pub fn with_shortfall(mut self, shortfall: ShortfallPolicy) -> Self {
        self.shortfall = shortfall;
        self
    }

    /// Replay `transactions` (any order) and report realized P&L and the open position.
    ///
    /// All transactions are assumed to belong to the same asset; use
    /// [`compute_portfolio_pnl`] for mixed streams.
    pub fn compute(&self, transactions: &[Transaction]) -> Result<PnLResult, EngineError> {
        self.compute_sorted(chronological(transactions))
    }

    /// Replay `transactions` and return the lots still open afterwards, oldest first.
    pub fn fold_lots<'a>(
        &self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> Result<Vec<Lot>, EngineError> {
        let mut book = LotBook::new(*self);
        for tx in transactions {
            book.apply(tx)?;
        }
        Ok(book.lots.into_iter().collect())
    }

    fn compute_sorted<'a>(
        &self,
        sorted: impl IntoIterator<Item = &'a Transaction>,
    ) -> Result<PnLResult, EngineError> {
        let mut book = LotBook::new(*self);
        for tx in sorted {
            book.apply(tx)?;
        }
        let result = book.into_result()?;

        debug!(
            "Disposal replay method={} realized={} open_qty={} avg_price={}",
            self.method, result.realized, result.quantity, result.avg_price
        );

        Ok(result)
    }
}

impl Default for DisposalEngine {
    fn default() -> Self {
        Self::new(DisposalMethod::Fifo)
    }
}

/// Entry point used by the valuation/reporting layer.
pub fn compute_realized_pnl(
    transactions: &[Transaction],
    method: DisposalMethod,
    include_fees: bool,
) -> Result<PnLResult, EngineError> {
    DisposalEngine::new(method)
        .with_fees(include_fees)
        .compute(transactions)
}

/// Run the disposal engine once per asset present in `transactions`.
pub fn compute_portfolio_pnl(
    transactions: &[Transaction],
    method: DisposalMethod,
    include_fees: bool,
) -> Result<BTreeMap<AssetId, PnLResult>, EngineError> {
    let engine = DisposalEngine::new(method).with_fees(include_fees);

    let mut by_asset: BTreeMap<AssetId, Vec<&Transaction>> = BTreeMap::new();
    for tx in chronological(transactions) {
        by_asset.entry(tx.asset_id().clone()).or_default().push(tx);
    }

    by_asset
        .into_iter()
        .map(|(asset_id, txs)| Ok((asset_id, engine.compute_sorted(txs)?)))
        .collect()
}

/// Open lots plus running totals for a single replay.
struct LotBook {
    engine: DisposalEngine,
    lots: VecDeque<Lot>,
    realized: Decimal,
    unmatched: Decimal,
}

impl LotBook {
    fn new(engine: DisposalEngine) -> Self {
        Self {
            engine,
            lots: VecDeque::new(),
            realized: Decimal::zero(),
            unmatched: Decimal::zero(),
        }
    }

    fn apply(&mut self, tx: &Transaction) -> Result<(), EngineError> {
        if tx.is_acquisition() {
            self.acquire(tx)
        } else {
            self.dispose(tx)
        }
    }

    fn fee_of(&self, tx: &Transaction) -> Decimal {
        if self.engine.include_fees {
            tx.fee()
        } else {
            Decimal::zero()
        }
    }

    fn open_quantity(&self) -> Result<Decimal, EngineError> {
        checked(
            Decimal::checked_sum(self.lots.iter().map(|lot| lot.quantity)),
            || "open lot quantity".to_string(),
        )
    }

    fn open_cost(&self) -> Result<Decimal, EngineError> {
        let costs = self
            .lots
            .iter()
            .map(Lot::cost)
            .collect::<Result<Vec<_>, _>>()?;
        checked(Decimal::checked_sum(costs), || "open lot cost".to_string())
    }

    fn acquire(&mut self, tx: &Transaction) -> Result<(), EngineError> {
        let quantity = tx.quantity();
        let cost = checked(
            tx.price()
                .checked_mul(quantity)
                .and_then(|gross| gross.checked_add(self.fee_of(tx))),
            || format!("acquisition cost of {}", tx.id()),
        )?;
        let unit_cost = checked(cost.checked_div(quantity), || {
            format!("unit cost of {}", tx.id())
        })?;
        self.lots.push_back(Lot::new(quantity, unit_cost));
        Ok(())
    }

    fn dispose(&mut self, tx: &Transaction) -> Result<(), EngineError> {
        let requested = tx.quantity();
        let price = tx.price();
        let fee_per_unit = checked(self.fee_of(tx).checked_div(requested), || {
            format!("fee per unit of {}", tx.id())
        })?;

        let available = self.open_quantity()?;
        let shortfall = requested - available;
        if self.engine.shortfall == ShortfallPolicy::Reject
            && shortfall.is_positive()
            && !is_dust(shortfall)
        {
            return Err(EngineError::InsufficientInventory {
                asset_id: tx.asset_id().to_string(),
                transaction_id: tx.id().to_string(),
                requested,
                available,
            });
        }

        if self.engine.method == DisposalMethod::Avg {
            self.collapse_to_average()?;
        }

        let mut remaining = requested;
        while remaining.is_positive() {
            let Some(lot) = self.take_lot() else {
                break;
            };

            let take = remaining.min(lot.quantity);
            let gain = checked(matched_gain(take, price, lot.unit_cost, fee_per_unit), || {
                format!("realized P&L of {}", tx.id())
            })?;
            self.realized = checked(self.realized.checked_add(gain), || {
                format!("realized P&L of {}", tx.id())
            })?;

            let leftover = lot.quantity - take;
            if !is_dust(leftover) {
                self.return_lot(Lot::new(leftover, lot.unit_cost));
            }
            remaining = remaining - take;
        }

        if remaining.is_positive() && !is_dust(remaining) {
            warn!(
                "Disposal {} of {} exceeded open lots by {}; excess left unmatched",
                tx.id(),
                tx.asset_id(),
                remaining
            );
            self.unmatched = checked(self.unmatched.checked_add(remaining), || {
                format!("unmatched quantity of {}", tx.asset_id())
            })?;
        }

        Ok(())
    }

    /// Replace every open lot with one lot at the quantity-weighted unit cost.
    fn collapse_to_average(&mut self) -> Result<(), EngineError> {
        if self.lots.len() < 2 {
            return Ok(());
        }
        let quantity = self.open_quantity()?;
        let unit_cost = checked(self.open_cost()?.checked_div(quantity), || {
            "average unit cost".to_string()
        })?;
        self.lots.clear();
        self.lots.push_back(Lot::new(quantity, unit_cost));
        Ok(())
    }

    fn take_lot(&mut self) -> Option<Lot> {
        match self.engine.method {
            DisposalMethod::Fifo | DisposalMethod::Avg => self.lots.pop_front(),
            DisposalMethod::Lifo => self.lots.pop_back(),
        }
    }

    fn return_lot(&mut self, lot: Lot) {
        match self.engine.method {
            DisposalMethod::Fifo | DisposalMethod::Avg => self.lots.push_front(lot),
            DisposalMethod::Lifo => self.lots.push_back(lot),
        }
    }

    fn into_result(self) -> Result<PnLResult, EngineError> {
        let quantity = self.open_quantity()?;
        let avg_price = if is_dust(quantity) {
            Decimal::zero()
        } else {
            checked(self.open_cost()?.checked_div(quantity), || {
                "average price of open lots".to_string()
            })?
        };

        Ok(PnLResult {
            realized: self.realized,
            quantity,
            avg_price,
            unmatched_quantity: self.unmatched,
        })
    }
}

/// `take * (price - unit_cost - fee_per_unit)`, or `None` on overflow.
fn matched_gain(
    take: Decimal,
    price: Decimal,
    unit_cost: Decimal,
    fee_per_unit: Decimal,
) -> Option<Decimal> {
    take.checked_mul(price)?
        .checked_sub(take.checked_mul(unit_cost)?)?
        .checked_sub(take.checked_mul(fee_per_unit)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TimeMs, Trade, TransactionId, TransactionKind};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn tx(id: &str, time_ms: i64, kind: TransactionKind) -> Transaction {
        Transaction::new(
            TransactionId::new(id),
            AssetId::new("bitcoin"),
            TimeMs::new(time_ms),
            kind,
        )
        .unwrap()
    }

    fn trade(qty: &str, px: &str) -> Trade {
        Trade::new(d(qty), d(px), Decimal::zero())
    }

    #[test]
    fn test_lifo_leftover_stays_at_back() {
        let txs = vec![
            tx("1", 1, TransactionKind::Buy(trade("1", "100"))),
            tx("2", 2, TransactionKind::Buy(trade("2", "110"))),
            tx("3", 3, TransactionKind::Sell(trade("1", "120"))),
            tx("4", 4, TransactionKind::Sell(trade("1.5", "120"))),
        ];
        let lots = DisposalEngine::new(DisposalMethod::Lifo)
            .fold_lots(txs.iter())
            .unwrap();
        assert_eq!(lots, vec![Lot::new(d("0.5"), d("100"))]);
    }

    #[test]
    fn test_fifo_leftover_stays_at_front() {
        let txs = vec![
            tx("1", 1, TransactionKind::Buy(trade("2", "100"))),
            tx("2", 2, TransactionKind::Buy(trade("1", "110"))),
            tx("3", 3, TransactionKind::Sell(trade("1", "120"))),
        ];
        let lots = DisposalEngine::new(DisposalMethod::Fifo)
            .fold_lots(txs.iter())
            .unwrap();
        assert_eq!(
            lots,
            vec![Lot::new(d("1"), d("100")), Lot::new(d("1"), d("110"))]
        );
    }

    #[test]
    fn test_avg_collapses_book_on_disposal() {
        let txs = vec![
            tx("1", 1, TransactionKind::Buy(trade("1", "100"))),
            tx("2", 2, TransactionKind::Buy(trade("3", "120"))),
            tx("3", 3, TransactionKind::Sell(trade("2", "150"))),
        ];
        let lots = DisposalEngine::new(DisposalMethod::Avg)
            .fold_lots(txs.iter())
            .unwrap();
        assert_eq!(lots, vec![Lot::new(d("2"), d("115"))]);
    }

    #[test]
    fn test_dust_leftover_is_discarded() {
        let txs = vec![
            tx("1", 1, TransactionKind::Buy(trade("1.0000005", "100"))),
            tx("2", 2, TransactionKind::Sell(trade("1", "100"))),
        ];
        let result = DisposalEngine::new(DisposalMethod::Fifo)
            .compute(&txs)
            .unwrap();
        assert_eq!(result.quantity, Decimal::zero());
        assert_eq!(result.avg_price, Decimal::zero());
    }

    #[test]
    fn test_reject_leaves_no_partial_state() {
        let txs = vec![
            tx("1", 1, TransactionKind::Buy(trade("1", "100"))),
            tx("2", 2, TransactionKind::Sell(trade("2", "120"))),
        ];
        let err = DisposalEngine::new(DisposalMethod::Fifo)
            .compute(&txs)
            .unwrap_err();
        match err {
            EngineError::InsufficientInventory {
                transaction_id,
                requested,
                available,
                ..
            } => {
                assert_eq!(transaction_id, "2");
                assert_eq!(requested, d("2"));
                assert_eq!(available, d("1"));
            }
            other => panic!("Expected InsufficientInventory, got {:?}", other),
        }
    }

    #[test]
    fn test_fees_excluded() {
        let txs = vec![
            tx(
                "1",
                1,
                TransactionKind::Buy(Trade::new(d("1"), d("100"), d("1"))),
            ),
            tx(
                "2",
                2,
                TransactionKind::Sell(Trade::new(d("1"), d("120"), d("1"))),
            ),
        ];
        let result = compute_realized_pnl(&txs, DisposalMethod::Fifo, false).unwrap();
        assert_eq!(result.realized, d("20"));
    }

    #[test]
    fn test_overflowing_cost_is_an_error() {
        let txs = vec![tx(
            "1",
            1,
            TransactionKind::Buy(trade("1000000000000000", "1000000000000000")),
        )];
        for method in [DisposalMethod::Fifo, DisposalMethod::Lifo, DisposalMethod::Avg] {
            let err = DisposalEngine::new(method).compute(&txs).unwrap_err();
            assert!(
                matches!(err, EngineError::Overflow(_)),
                "method {}: {:?}",
                method,
                err
            );
        }
    }

    #[test]
    fn test_overflowing_gain_is_an_error() {
        let txs = vec![
            tx("1", 1, TransactionKind::Buy(trade("1000000000000000", "0"))),
            tx(
                "2",
                2,
                TransactionKind::Sell(trade("1000000000000000", "1000000000000000")),
            ),
        ];
        let err = compute_realized_pnl(&txs, DisposalMethod::Fifo, true).unwrap_err();
        assert!(matches!(err, EngineError::Overflow(_)));
    }
}
