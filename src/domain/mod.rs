//! Domain types and determinism layer for the cost-basis ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, AssetId, TransactionId, DisposalMethod
//! - Validated transaction events and their loosely typed input record
//! - Stable chronological ordering helper

pub mod decimal;
pub mod ordering;
pub mod price;
pub mod primitives;
pub mod transaction;

pub use decimal::Decimal;
pub use ordering::{chronological, sort_chronological};
pub use price::AssetPrice;
pub use primitives::{AssetId, DisposalMethod, TimeMs, TransactionId};
pub use transaction::{Direction, Trade, Transaction, TransactionKind, TransactionRecord};
