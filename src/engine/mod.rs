//! Pure computation engine(s) for deterministic cost-basis logic.

use crate::domain::{AssetId, Decimal};
use crate::error::EngineError;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};

pub mod disposal;
pub mod fold;
pub mod history;

pub use disposal::{compute_portfolio_pnl, compute_realized_pnl, DisposalEngine, ShortfallPolicy};
pub use fold::{fold_average_cost, fold_lots, HistoryFold};
pub use history::{build_history, build_history_as_of, HistoricalDataPoint, HistoryReconstructor};

/// Quantity at or below which an open position counts as closed (1e-6 units).
pub const DUST_THRESHOLD: Decimal = Decimal::new(RustDecimal::from_parts(1, 0, 0, false, 6));

/// Returns true if `quantity` is small enough to be floating-point residue.
pub fn is_dust(quantity: Decimal) -> bool {
    quantity.is_within(DUST_THRESHOLD)
}

/// Unwrap a checked arithmetic result, naming `what` on overflow.
pub(crate) fn checked(
    value: Option<Decimal>,
    what: impl FnOnce() -> String,
) -> Result<Decimal, EngineError> {
    value.ok_or_else(|| EngineError::Overflow(what()))
}

/// A discrete quantity acquired at a specific unit cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lot {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl Lot {
    pub fn new(quantity: Decimal, unit_cost: Decimal) -> Self {
        Self {
            quantity,
            unit_cost,
        }
    }

    pub fn cost(&self) -> Result<Decimal, EngineError> {
        checked(self.quantity.checked_mul(self.unit_cost), || {
            format!("cost of lot {} @ {}", self.quantity, self.unit_cost)
        })
    }
}

/// Aggregate open inventory for one asset at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub asset_id: AssetId,
    pub quantity: Decimal,
    pub total_cost: Decimal,
}

impl Position {
    pub fn new(asset_id: AssetId) -> Self {
        Self {
            asset_id,
            quantity: Decimal::zero(),
            total_cost: Decimal::zero(),
        }
    }

    /// Build a position by summing a set of open lots.
    pub fn from_lots<'a>(
        asset_id: AssetId,
        lots: impl IntoIterator<Item = &'a Lot>,
    ) -> Result<Self, EngineError> {
        let mut position = Self::new(asset_id);
        for lot in lots {
            position.quantity = checked(position.quantity.checked_add(lot.quantity), || {
                format!("open quantity of {}", position.asset_id)
            })?;
            position.total_cost = checked(position.total_cost.checked_add(lot.cost()?), || {
                format!("open cost of {}", position.asset_id)
            })?;
        }
        Ok(position)
    }

    /// True while the quantity is above the dust threshold.
    pub fn is_open(&self) -> bool {
        !is_dust(self.quantity)
    }

    /// Average unit cost; zero once the position is closed.
    pub fn avg_cost(&self) -> Decimal {
        if self.is_open() {
            self.total_cost.safe_div(self.quantity)
        } else {
            Decimal::zero()
        }
    }
}

/// Outcome of replaying one asset's transactions through the disposal engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnLResult {
    /// Profit or loss locked in by disposals.
    pub realized: Decimal,
    /// Remaining open quantity.
    pub quantity: Decimal,
    /// Cost-weighted average unit cost of the remaining lots.
    pub avg_price: Decimal,
    /// Disposed quantity that found no open lot (only under `ShortfallPolicy::Truncate`).
    pub unmatched_quantity: Decimal,
}

impl PnLResult {
    /// Paper profit or loss of the open quantity at `market_price`.
    pub fn unrealized(&self, market_price: Decimal) -> Result<Decimal, EngineError> {
        let spread = checked(market_price.checked_sub(self.avg_price), || {
            "unrealized spread".to_string()
        })?;
        checked(self.quantity.checked_mul(spread), || {
            "unrealized P&L".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_dust_threshold() {
        assert_eq!(DUST_THRESHOLD, d("0.000001"));
        assert!(is_dust(d("0.000001")));
        assert!(is_dust(Decimal::zero()));
        assert!(!is_dust(d("0.0000011")));
    }

    #[test]
    fn test_position_from_lots() {
        let lots = [Lot::new(d("1"), d("100")), Lot::new(d("3"), d("120"))];
        let position = Position::from_lots(AssetId::new("eth"), lots.iter()).unwrap();
        assert_eq!(position.quantity, d("4"));
        assert_eq!(position.total_cost, d("460"));
        assert_eq!(position.avg_cost(), d("115"));
        assert!(position.is_open());
    }

    #[test]
    fn test_lot_cost_overflow_is_an_error() {
        let huge = Lot::new(d("1000000000000000"), d("1000000000000000"));
        assert!(matches!(huge.cost(), Err(EngineError::Overflow(_))));
        assert!(Position::from_lots(AssetId::new("eth"), [huge].iter()).is_err());
    }

    #[test]
    fn test_closed_position_has_zero_avg_cost() {
        let mut position = Position::new(AssetId::new("eth"));
        position.quantity = d("0.0000001");
        position.total_cost = d("5");
        assert!(!position.is_open());
        assert_eq!(position.avg_cost(), Decimal::zero());
    }

    #[test]
    fn test_unrealized() {
        let result = PnLResult {
            realized: d("10"),
            quantity: d("2"),
            avg_price: d("100"),
            unmatched_quantity: Decimal::zero(),
        };
        assert_eq!(result.unrealized(d("130")).unwrap(), d("60"));
        assert_eq!(result.unrealized(d("90")).unwrap(), d("-20"));
    }

    #[test]
    fn test_pnl_result_serializes_camel_case() {
        let value = serde_json::to_value(PnLResult::default()).unwrap();
        assert!(value.get("avgPrice").is_some());
        assert!(value.get("realized").is_some());
        assert!(value.get("unmatchedQuantity").is_some());
    }
}
