//! Stable chronological ordering for deterministic processing.

use crate::domain::Transaction;

/// Sort transactions by timestamp.
///
/// The sort is stable: transactions sharing a timestamp keep their input order.
pub fn sort_chronological(transactions: &mut [Transaction]) {
    transactions.sort_by_key(|tx| tx.timestamp());
}

/// Borrowing variant of [`sort_chronological`] that leaves the input untouched.
pub fn chronological(transactions: &[Transaction]) -> Vec<&Transaction> {
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by_key(|tx| tx.timestamp());
    sorted
}
