//! Acquisition and disposal events fed into the ledger.
//!
//! `TransactionRecord` is the loosely typed shape that arrives from callers.
//! It is validated exactly once into a `Transaction`, whose `TransactionKind`
//! is a closed set of seven variants.

use crate::domain::{AssetId, Decimal, TimeMs, TransactionId};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Quantity, unit price and fee of a trade-like event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
}

impl Trade {
    pub fn new(quantity: Decimal, price: Decimal, fee: Decimal) -> Self {
        Self {
            quantity,
            price,
            fee,
        }
    }
}

/// Whether an event adds to or removes from inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Acquisition,
    Disposal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Buy(Trade),
    Sell(Trade),
    TransferIn(Trade),
    TransferOut(Trade),
    Deposit(Trade),
    Withdraw(Trade),
    /// Received for free or at a declared fair value.
    Airdrop(Trade),
}

impl TransactionKind {
    pub fn direction(&self) -> Direction {
        match self {
            TransactionKind::Buy(_)
            | TransactionKind::TransferIn(_)
            | TransactionKind::Deposit(_)
            | TransactionKind::Airdrop(_) => Direction::Acquisition,
            TransactionKind::Sell(_)
            | TransactionKind::TransferOut(_)
            | TransactionKind::Withdraw(_) => Direction::Disposal,
        }
    }

    pub fn is_acquisition(&self) -> bool {
        self.direction() == Direction::Acquisition
    }

    pub fn is_disposal(&self) -> bool {
        self.direction() == Direction::Disposal
    }

    pub fn quantity(&self) -> Decimal {
        self.trade().quantity
    }

    pub fn price(&self) -> Decimal {
        self.trade().price
    }

    pub fn fee(&self) -> Decimal {
        self.trade().fee
    }

    /// Wire name used by `TransactionRecord::kind`.
    pub fn type_name(&self) -> &'static str {
        match self {
            TransactionKind::Buy(_) => "buy",
            TransactionKind::Sell(_) => "sell",
            TransactionKind::TransferIn(_) => "transfer_in",
            TransactionKind::TransferOut(_) => "transfer_out",
            TransactionKind::Deposit(_) => "deposit",
            TransactionKind::Withdraw(_) => "withdraw",
            TransactionKind::Airdrop(_) => "airdrop",
        }
    }

    pub fn trade(&self) -> &Trade {
        match self {
            TransactionKind::Buy(t)
            | TransactionKind::Sell(t)
            | TransactionKind::TransferIn(t)
            | TransactionKind::TransferOut(t)
            | TransactionKind::Deposit(t)
            | TransactionKind::Withdraw(t)
            | TransactionKind::Airdrop(t) => t,
        }
    }
}

/// A validated, immutable ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TransactionRecord", into = "TransactionRecord")]
pub struct Transaction {
    id: TransactionId,
    asset_id: AssetId,
    timestamp: TimeMs,
    kind: TransactionKind,
}

impl Transaction {
    /// Create a transaction, rejecting non-positive quantities and negative
    /// prices or fees.
    pub fn new(
        id: TransactionId,
        asset_id: AssetId,
        timestamp: TimeMs,
        kind: TransactionKind,
    ) -> Result<Self, EngineError> {
        let invalid = |reason: &str| EngineError::InvalidTransaction {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        if !kind.quantity().is_positive() {
            return Err(invalid("quantity must be greater than zero"));
        }
        if kind.price().is_negative() {
            return Err(invalid("price must not be negative"));
        }
        if kind.fee().is_negative() {
            return Err(invalid("fee must not be negative"));
        }

        Ok(Self {
            id,
            asset_id,
            timestamp,
            kind,
        })
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub fn asset_id(&self) -> &AssetId {
        &self.asset_id
    }

    pub fn timestamp(&self) -> TimeMs {
        self.timestamp
    }

    pub fn kind(&self) -> &TransactionKind {
        &self.kind
    }

    pub fn quantity(&self) -> Decimal {
        self.kind.quantity()
    }

    pub fn price(&self) -> Decimal {
        self.kind.price()
    }

    pub fn fee(&self) -> Decimal {
        self.kind.fee()
    }

    pub fn is_acquisition(&self) -> bool {
        self.kind.is_acquisition()
    }

    pub fn is_disposal(&self) -> bool {
        self.kind.is_disposal()
    }
}

/// Loosely typed transaction as supplied by UI forms, APIs and importers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub asset_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = EngineError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        let trade = Trade::new(record.quantity, record.price, record.fee);
        let kind = match record.kind.trim().to_ascii_lowercase().as_str() {
            "buy" => TransactionKind::Buy(trade),
            "sell" => TransactionKind::Sell(trade),
            "transfer_in" => TransactionKind::TransferIn(trade),
            "transfer_out" => TransactionKind::TransferOut(trade),
            "deposit" => TransactionKind::Deposit(trade),
            "withdraw" => TransactionKind::Withdraw(trade),
            "airdrop" => TransactionKind::Airdrop(trade),
            other => {
                return Err(EngineError::InvalidTransaction {
                    reason: format!("unknown transaction type: {}", other),
                    id: record.id,
                })
            }
        };

        Transaction::new(
            TransactionId::new(record.id),
            AssetId::new(record.asset_id),
            TimeMs::new(record.timestamp),
            kind,
        )
    }
}

impl From<Transaction> for TransactionRecord {
    fn from(tx: Transaction) -> Self {
        TransactionRecord {
            kind: tx.kind.type_name().to_string(),
            quantity: tx.quantity(),
            price: tx.price(),
            fee: tx.fee(),
            timestamp: tx.timestamp.as_ms(),
            id: tx.id.0,
            asset_id: tx.asset_id.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn record(kind: &str, quantity: &str, price: &str, fee: &str) -> TransactionRecord {
        TransactionRecord {
            id: "tx-1".to_string(),
            asset_id: "bitcoin".to_string(),
            kind: kind.to_string(),
            quantity: d(quantity),
            price: d(price),
            fee: d(fee),
            timestamp: 1_000,
        }
    }

    #[test]
    fn test_record_maps_every_kind() {
        let cases = [
            ("buy", Direction::Acquisition),
            ("transfer_in", Direction::Acquisition),
            ("deposit", Direction::Acquisition),
            ("airdrop", Direction::Acquisition),
            ("sell", Direction::Disposal),
            ("transfer_out", Direction::Disposal),
            ("withdraw", Direction::Disposal),
        ];

        for (kind, direction) in cases {
            let tx = Transaction::try_from(record(kind, "2", "10", "1")).unwrap();
            assert_eq!(tx.kind().direction(), direction, "kind {}", kind);
            assert_eq!(tx.kind().type_name(), kind);
            assert_eq!(tx.quantity(), d("2"));
            assert_eq!(tx.fee(), d("1"));
        }
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let err = Transaction::try_from(record("buy", "0", "10", "0")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransaction { .. }));

        let err = Transaction::try_from(record("sell", "-1", "10", "0")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransaction { .. }));
    }

    #[test]
    fn test_rejects_negative_price_and_fee() {
        assert!(Transaction::try_from(record("buy", "1", "-10", "0")).is_err());
        assert!(Transaction::try_from(record("buy", "1", "10", "-0.5")).is_err());
    }

    #[test]
    fn test_rejects_unknown_type() {
        let err = Transaction::try_from(record("stake", "1", "10", "0")).unwrap_err();
        assert!(err.to_string().contains("unknown transaction type"));
    }

    #[test]
    fn test_airdrop_with_fee_round_trips() {
        let original = record("airdrop", "100", "0", "1");
        let tx = Transaction::try_from(original.clone()).unwrap();
        assert_eq!(tx.kind(), &TransactionKind::Airdrop(Trade::new(d("100"), d("0"), d("1"))));
        assert_eq!(TransactionRecord::from(tx), original);
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"id":"a","assetId":"eth","type":"transfer_in","quantity":1.5,"price":2000,"timestamp":5}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.asset_id().as_str(), "eth");
        assert_eq!(tx.fee(), Decimal::zero());
        assert!(matches!(tx.kind(), TransactionKind::TransferIn(_)));

        let bad = r#"{"id":"b","assetId":"eth","type":"buy","quantity":0,"price":1,"timestamp":5}"#;
        assert!(serde_json::from_str::<Transaction>(bad).is_err());
    }

    #[test]
    fn test_serialize_as_record() {
        let tx = Transaction::try_from(record("withdraw", "1", "3", "0.1")).unwrap();
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["type"], "withdraw");
        assert_eq!(value["assetId"], "bitcoin");
        assert_eq!(value["timestamp"], 1_000);
    }
}
