//! Currencies and their minor-unit precision.
//!
//! CRITICAL: Never use floating-point for money calculations. Amounts are
//! `rust_decimal::Decimal` values kept exact at the currency's precision.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places kept by stored amounts, quantities and prices (`NUMERIC(20, 4)`).
pub const STORED_SCALE: u32 = 4;

/// Exclusive magnitude bound of a stored value: `NUMERIC(20, 4)` keeps 16 integer digits.
#[must_use]
pub fn stored_limit() -> Decimal {
    Decimal::from(10_000_000_000_000_000_i64)
}

/// Returns true if `value` is stored without rounding or overflow.
#[must_use]
pub fn fits_storage(value: Decimal) -> bool {
    value.abs() < stored_limit() && value.round_dp_with_strategy(STORED_SCALE, RoundingStrategy::ToZero) == value
}

/// ISO 4217 currency codes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US Dollar
    Usd,
    /// Indonesian Rupiah
    Idr,
    /// Euro
    Eur,
    /// Singapore Dollar
    Sgd,
    /// Japanese Yen
    Jpy,
    /// Pound Sterling
    Gbp,
    /// Australian Dollar
    Aud,
}

impl Currency {
    /// Number of decimal places of the currency's minor unit.
    #[must_use]
    pub const fn minor_units(self) -> u32 {
        match self {
            Self::Jpy => 0,
            Self::Usd | Self::Idr | Self::Eur | Self::Sgd | Self::Gbp | Self::Aud => 2,
        }
    }

    /// Rounds an amount to the currency's minor units using banker's rounding.
    #[must_use]
    pub fn round(self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.minor_units(), RoundingStrategy::MidpointNearestEven)
    }

    /// Returns true if the amount is exactly representable in minor units.
    #[must_use]
    pub fn fits_precision(self, amount: Decimal) -> bool {
        amount.round_dp_with_strategy(self.minor_units(), RoundingStrategy::ToZero) == amount
    }

    /// Returns the amount rescaled to exactly `minor_units` decimal places.
    ///
    /// Used when rendering results so that `60` and `60.00` serialize identically.
    #[must_use]
    pub fn normalize(self, amount: Decimal) -> Decimal {
        let mut rounded = self.round(amount);
        rounded.rescale(self.minor_units());
        rounded
    }

    /// Returns the ISO 4217 code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Idr => "IDR",
            Self::Eur => "EUR",
            Self::Sgd => "SGD",
            Self::Jpy => "JPY",
            Self::Gbp => "GBP",
            Self::Aud => "AUD",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "USD" => Ok(Self::Usd),
            "IDR" => Ok(Self::Idr),
            "EUR" => Ok(Self::Eur),
            "SGD" => Ok(Self::Sgd),
            "JPY" => Ok(Self::Jpy),
            "GBP" => Ok(Self::Gbp),
            "AUD" => Ok(Self::Aud),
            _ => Err(format!("Unknown currency: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn test_minor_units() {
        assert_eq!(Currency::Usd.minor_units(), 2);
        assert_eq!(Currency::Jpy.minor_units(), 0);
    }

    #[test]
    fn test_fits_precision() {
        assert!(Currency::Usd.fits_precision(dec!(100.25)));
        assert!(Currency::Usd.fits_precision(dec!(100.2500)));
        assert!(!Currency::Usd.fits_precision(dec!(100.255)));
        assert!(Currency::Jpy.fits_precision(dec!(1500)));
        assert!(!Currency::Jpy.fits_precision(dec!(1500.5)));
    }

    #[test]
    fn test_fits_storage() {
        assert!(fits_storage(dec!(9999999999999999.9999)));
        assert!(fits_storage(dec!(-9999999999999999.9999)));
        assert!(fits_storage(dec!(1.2500)));
        assert!(!fits_storage(dec!(10000000000000000)));
        assert!(!fits_storage(Decimal::MAX));
        assert!(!fits_storage(dec!(1.00001)));
    }

    #[test]
    fn test_round_uses_bankers_rounding() {
        assert_eq!(Currency::Usd.round(dec!(2.345)), dec!(2.34));
        assert_eq!(Currency::Usd.round(dec!(2.355)), dec!(2.36));
        assert_eq!(Currency::Jpy.round(dec!(10.5)), dec!(10));
    }

    #[test]
    fn test_normalize_fixes_scale() {
        assert_eq!(Currency::Usd.normalize(dec!(60)).to_string(), "60.00");
        assert_eq!(Currency::Usd.normalize(dec!(60.0000)).to_string(), "60.00");
        assert_eq!(Currency::Jpy.normalize(dec!(1500.00)).to_string(), "1500");
    }

    #[test]
    fn test_currency_from_str() {
        assert_eq!(Currency::from_str("USD").unwrap(), Currency::Usd);
        assert_eq!(Currency::from_str("usd").unwrap(), Currency::Usd);
        assert_eq!(Currency::from_str("GBP").unwrap(), Currency::Gbp);
        assert_eq!(Currency::from_str("JPY").unwrap(), Currency::Jpy);

        assert!(Currency::from_str("XXX").is_err());
        assert!(Currency::from_str("").is_err());
    }

    #[test]
    fn test_currency_display_roundtrips_code() {
        for currency in [
            Currency::Usd,
            Currency::Idr,
            Currency::Eur,
            Currency::Sgd,
            Currency::Jpy,
            Currency::Gbp,
            Currency::Aud,
        ] {
            assert_eq!(Currency::from_str(&currency.to_string()).unwrap(), currency);
        }
    }
}
