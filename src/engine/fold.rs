//! Folding a transaction prefix into per-asset positions.

use crate::domain::{AssetId, Decimal, Transaction};
use crate::error::EngineError;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

use super::{checked, DisposalEngine, Position};

/// How historical snapshots derive positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryFold {
    /// Running average cost for every method. Reproduces the legacy figures;
    /// the requested disposal method has no effect on this fold.
    #[default]
    AverageCost,
    /// Per-lot matching through [`DisposalEngine`] with the requested method.
    Lots,
}

impl FromStr for HistoryFold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average_cost" => Ok(HistoryFold::AverageCost),
            "lots" => Ok(HistoryFold::Lots),
            other => Err(format!("must be average_cost or lots, got {}", other)),
        }
    }
}

/// Fold chronologically ordered transactions with a running average cost.
///
/// Acquisitions add `quantity` and `quantity * price + fee`; disposals remove
/// `quantity` at the running average. A position that drops to dust (or below
/// zero) is reset to empty.
pub fn fold_average_cost<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> Result<BTreeMap<AssetId, Position>, EngineError> {
    let mut positions: BTreeMap<AssetId, Position> = BTreeMap::new();

    for tx in transactions {
        let position = positions
            .entry(tx.asset_id().clone())
            .or_insert_with(|| Position::new(tx.asset_id().clone()));
        let overflow = || format!("running average of {} at {}", tx.asset_id(), tx.id());

        if tx.is_acquisition() {
            position.quantity = checked(position.quantity.checked_add(tx.quantity()), overflow)?;
            position.total_cost = checked(
                tx.quantity()
                    .checked_mul(tx.price())
                    .and_then(|gross| gross.checked_add(tx.fee()))
                    .and_then(|cost| position.total_cost.checked_add(cost)),
                overflow,
            )?;
            continue;
        }

        let avg_cost = if position.is_open() {
            checked(position.total_cost.checked_div(position.quantity), overflow)?
        } else {
            Decimal::zero()
        };
        position.quantity = position.quantity - tx.quantity();
        position.total_cost = checked(
            tx.quantity()
                .checked_mul(avg_cost)
                .and_then(|released| position.total_cost.checked_sub(released)),
            overflow,
        )?;

        if !position.is_open() || position.quantity.is_negative() {
            if position.quantity.is_negative() {
                debug!(
                    "Disposal {} overdrew {} by {}; position reset",
                    tx.id(),
                    tx.asset_id(),
                    position.quantity.abs()
                );
            }
            position.quantity = Decimal::zero();
            position.total_cost = Decimal::zero();
        }
    }

    Ok(positions)
}

/// Fold chronologically ordered transactions through the lot engine, one asset at a time.
pub fn fold_lots<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    engine: &DisposalEngine,
) -> Result<BTreeMap<AssetId, Position>, EngineError> {
    let mut by_asset: BTreeMap<AssetId, Vec<&Transaction>> = BTreeMap::new();
    for tx in transactions {
        by_asset.entry(tx.asset_id().clone()).or_default().push(tx);
    }

    by_asset
        .into_iter()
        .map(|(asset_id, txs)| {
            let lots = engine.fold_lots(txs)?;
            let position = Position::from_lots(asset_id.clone(), lots.iter())?;
            Ok((asset_id, position))
        })
        .collect()
}
