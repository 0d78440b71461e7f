//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Provides canonical parsing from strings, formatting without exponent notation,
//! and the guarded arithmetic the ledger relies on (dust checks, division by zero).

use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal numeric type for financial calculations.
///
/// Backed by rust_decimal to avoid floating-point drift.
/// Serializes to JSON number (not string) by default.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    /// Create a Decimal from a RustDecimal.
    pub const fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Build a Decimal from an `f64` reported by an external source.
    ///
    /// Returns `None` for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        RustDecimal::from_f64_retain(value).map(|d| Decimal(d.normalize()))
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    /// Get the underlying RustDecimal.
    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    /// Returns the value 100.
    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    /// Smaller of two values.
    pub fn min(self, other: Decimal) -> Decimal {
        if self <= other {
            self
        } else {
            other
        }
    }

    /// Division that resolves to zero instead of panicking when `rhs` is zero
    /// or the quotient overflows.
    pub fn safe_div(self, rhs: Decimal) -> Decimal {
        self.0.checked_div(rhs.0).map(Decimal).unwrap_or_default()
    }

    /// Addition returning `None` on overflow.
    pub fn checked_add(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_add(rhs.0).map(Decimal)
    }

    /// Subtraction returning `None` on overflow.
    pub fn checked_sub(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_sub(rhs.0).map(Decimal)
    }

    /// Multiplication returning `None` on overflow.
    pub fn checked_mul(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }

    /// Division returning `None` on overflow or a zero divisor.
    pub fn checked_div(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_div(rhs.0).map(Decimal)
    }

    /// Sum of `values`, or `None` if any partial sum overflows.
    pub fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
        values
            .into_iter()
            .try_fold(Decimal::zero(), |acc, value| acc.checked_add(value))
    }

    /// Returns true if the value is at or below `threshold` in magnitude.
    pub fn is_within(&self, threshold: Decimal) -> bool {
        self.abs() <= threshold
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

// Arithmetic operations. These panic on overflow; ledger code uses the
// `checked_*` forms.
impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl std::iter::Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc + d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_decimal_canonical_no_exponent() {
        let decimal = d("123.4500");
        let formatted = decimal.to_canonical_string();
        assert!(!formatted.contains('e'));
        assert_eq!(formatted, "123.45");
    }

    #[test]
    fn test_decimal_arithmetic() {
        let a = d("10.5");
        let b = d("2.5");

        assert_eq!((a + b).to_canonical_string(), "13");
        assert_eq!((a - b).to_canonical_string(), "8");
        assert_eq!((a * b).to_canonical_string(), "26.25");
        assert_eq!(a.safe_div(b).to_canonical_string(), "4.2");
    }

    #[test]
    fn test_safe_div_by_zero_is_zero() {
        assert_eq!(d("10").safe_div(Decimal::zero()), Decimal::zero());
        assert_eq!(Decimal::zero().safe_div(Decimal::zero()), Decimal::zero());
    }

    #[test]
    fn test_decimal_json_serialization() {
        let json = serde_json::to_value(d("123.456")).unwrap();
        assert!(json.is_number());
        assert_eq!(json.to_string(), "123.456");
    }

    #[test]
    fn test_from_f64() {
        assert_eq!(Decimal::from_f64(42.5), Some(d("42.5")));
        assert_eq!(Decimal::from_f64(f64::NAN), None);
    }

    #[test]
    fn test_min_and_within() {
        assert_eq!(d("1.5").min(d("2")), d("1.5"));
        assert_eq!(d("3").min(d("2")), d("2"));
        assert!(d("-0.0000005").is_within(d("0.000001")));
        assert!(!d("0.00001").is_within(d("0.000001")));
    }

    #[test]
    fn test_checked_arithmetic_reports_overflow() {
        let big = d("1000000000000000");
        assert_eq!(big.checked_mul(big), None);
        assert_eq!(Decimal::new(RustDecimal::MAX).checked_add(d("1")), None);
        assert_eq!(Decimal::new(RustDecimal::MIN).checked_sub(d("1")), None);
        assert_eq!(d("2.5").checked_mul(d("4")), Some(d("10")));
        assert_eq!(d("1").checked_sub(d("3")), Some(d("-2")));
        assert_eq!(d("1").checked_div(Decimal::zero()), None);
    }

    #[test]
    fn test_checked_sum() {
        assert_eq!(
            Decimal::checked_sum(vec![d("1.1"), d("2.2"), d("3.3")]),
            Some(d("6.6"))
        );
        assert_eq!(Decimal::checked_sum(Vec::new()), Some(Decimal::zero()));
        let max = Decimal::new(RustDecimal::MAX);
        assert_eq!(Decimal::checked_sum(vec![max, max]), None);
    }

    #[test]
    fn test_sum() {
        let total: Decimal = vec![d("1.1"), d("2.2"), d("3.3")].into_iter().sum();
        assert_eq!(total, d("6.6"));
    }
}
