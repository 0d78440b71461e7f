//! Historical price quote.

use crate::domain::{AssetId, Decimal};
use serde::{Deserialize, Serialize};

/// Price of one asset on one date, as reported by a price gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPrice {
    pub asset_id: AssetId,
    pub symbol: String,
    pub price: Decimal,
}

impl AssetPrice {
    pub fn new(asset_id: AssetId, symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            asset_id,
            symbol: symbol.into(),
            price,
        }
    }
}
