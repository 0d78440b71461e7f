use crate::domain::Decimal;
use crate::gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid transaction {id}: {reason}")]
    InvalidTransaction { id: String, reason: String },
    #[error(
        "Insufficient inventory for {asset_id} at transaction {transaction_id}: \
         requested {requested}, available {available}"
    )]
    InsufficientInventory {
        asset_id: String,
        transaction_id: String,
        requested: Decimal,
        available: Decimal,
    },
    #[error("Arithmetic overflow while computing {0}")]
    Overflow(String),
    #[error("Price gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
