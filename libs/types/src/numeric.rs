//! Fixed-point decimal types for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic so that sizes merged at a
//! price level add up exactly. Conversion to `f64` happens only where
//! indicator math needs it.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A strictly positive price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Wrap a decimal, returning None unless it is strictly positive.
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Build a whole-number price. Zero yields None.
    pub fn from_u64(value: u64) -> Option<Self> {
        Self::try_new(Decimal::from(value))
    }

    /// Parse a price from its decimal string form.
    pub fn from_str(s: &str) -> Option<Self> {
        Decimal::from_str(s).ok().and_then(Self::try_new)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Lossy conversion for indicator math.
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-negative size or volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// Wrap a decimal, returning None if it is negative.
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Parse a quantity from its decimal string form.
    pub fn from_str(s: &str) -> Option<Self> {
        Decimal::from_str(s).ok().and_then(Self::try_new)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Lossy conversion for indicator math.
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    /// Sum of two non-negative quantities is non-negative.
    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_price_must_be_positive() {
        assert!(Price::try_new(Decimal::ZERO).is_none());
        assert!(Price::try_new(Decimal::from(-1)).is_none());
        assert!(Price::from_str("150.25").is_some());
        assert!(Price::from_u64(0).is_none());
    }

    #[test]
    fn test_quantity_rejects_negative() {
        assert!(Quantity::try_new(Decimal::from(-5)).is_none());
        assert!(Quantity::try_new(Decimal::ZERO).unwrap().is_zero());
        assert_eq!(Quantity::from_str("2.5").unwrap().to_f64(), 2.5);
    }

    #[test]
    fn test_price_ordering() {
        let low = Price::from_str("99.5").unwrap();
        let high = Price::from_u64(100).unwrap();
        assert!(low < high);
    }

    #[test]
    fn test_price_serialization() {
        let price = Price::from_str("150.25").unwrap();
        let json = serde_json::to_string(&price).unwrap();
        let deserialized: Price = serde_json::from_str(&json).unwrap();
        assert_eq!(price, deserialized);
    }

    proptest! {
        #[test]
        fn quantity_sum_is_exact(a in 0i64..1_000_000_000, b in 0i64..1_000_000_000) {
            let qa = Quantity::try_new(Decimal::new(a, 4)).unwrap();
            let qb = Quantity::try_new(Decimal::new(b, 4)).unwrap();
            prop_assert_eq!(qa.saturating_add(qb).as_decimal(), Decimal::new(a + b, 4));
        }
    }
}
