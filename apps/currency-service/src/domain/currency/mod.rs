//! Currency Types
//!
//! The closed set of currencies the service quotes, and the pair type used
//! by lookups and subscriptions.
//!
//! Every rate in the table is expressed relative to [`CurrencyCode::REFERENCE`],
//! whose own value is always exactly 1.

use std::fmt;
use std::str::FromStr;

// =============================================================================
// Currency Code
// =============================================================================

/// ISO 4217 code of a supported currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum CurrencyCode {
    Eur,
    Usd,
    Jpy,
    Bgn,
    Czk,
    Dkk,
    Gbp,
    Huf,
    Pln,
    Ron,
    Sek,
    Chf,
    Isk,
    Nok,
    Hrk,
    Rub,
    Try,
    Aud,
    Brl,
    Cad,
    Cny,
    Hkd,
    Idr,
    Ils,
    Inr,
    Krw,
    Mxn,
    Myr,
    Nzd,
    Php,
    Sgd,
    Thb,
    Zar,
}

impl CurrencyCode {
    /// The currency every table entry is expressed against.
    pub const REFERENCE: Self = Self::Eur;

    const ALL: [Self; 33] = [
        Self::Eur,
        Self::Usd,
        Self::Jpy,
        Self::Bgn,
        Self::Czk,
        Self::Dkk,
        Self::Gbp,
        Self::Huf,
        Self::Pln,
        Self::Ron,
        Self::Sek,
        Self::Chf,
        Self::Isk,
        Self::Nok,
        Self::Hrk,
        Self::Rub,
        Self::Try,
        Self::Aud,
        Self::Brl,
        Self::Cad,
        Self::Cny,
        Self::Hkd,
        Self::Idr,
        Self::Ils,
        Self::Inr,
        Self::Krw,
        Self::Mxn,
        Self::Myr,
        Self::Nzd,
        Self::Php,
        Self::Sgd,
        Self::Thb,
        Self::Zar,
    ];

    /// Get all supported currencies.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &Self::ALL
    }

    /// Check if this is the reference currency.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::Eur)
    }

    /// Get the three-letter ISO code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eur => "EUR",
            Self::Usd => "USD",
            Self::Jpy => "JPY",
            Self::Bgn => "BGN",
            Self::Czk => "CZK",
            Self::Dkk => "DKK",
            Self::Gbp => "GBP",
            Self::Huf => "HUF",
            Self::Pln => "PLN",
            Self::Ron => "RON",
            Self::Sek => "SEK",
            Self::Chf => "CHF",
            Self::Isk => "ISK",
            Self::Nok => "NOK",
            Self::Hrk => "HRK",
            Self::Rub => "RUB",
            Self::Try => "TRY",
            Self::Aud => "AUD",
            Self::Brl => "BRL",
            Self::Cad => "CAD",
            Self::Cny => "CNY",
            Self::Hkd => "HKD",
            Self::Idr => "IDR",
            Self::Ils => "ILS",
            Self::Inr => "INR",
            Self::Krw => "KRW",
            Self::Mxn => "MXN",
            Self::Myr => "MYR",
            Self::Nzd => "NZD",
            Self::Php => "PHP",
            Self::Sgd => "SGD",
            Self::Thb => "THB",
            Self::Zar => "ZAR",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyCode {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(code))
            .ok_or_else(|| UnknownCurrency(code.to_string()))
    }
}

/// A currency code outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown currency code: {0}")]
pub struct UnknownCurrency(pub String);

// =============================================================================
// Rate Pair
// =============================================================================

/// A (base, destination) pair whose conversion rate a client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RatePair {
    /// Currency being converted from.
    pub base: CurrencyCode,
    /// Currency being converted to.
    pub destination: CurrencyCode,
}

impl RatePair {
    /// Create a new pair.
    #[must_use]
    pub const fn new(base: CurrencyCode, destination: CurrencyCode) -> Self {
        Self { base, destination }
    }

    /// Check whether base and destination are the same currency.
    #[must_use]
    pub fn is_self_pair(&self) -> bool {
        self.base == self.destination
    }
}

impl fmt::Display for RatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.destination)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("EUR", CurrencyCode::Eur ; "upper case")]
    #[test_case("usd", CurrencyCode::Usd ; "lower case")]
    #[test_case(" gbp ", CurrencyCode::Gbp ; "surrounding whitespace")]
    #[test_case("ZaR", CurrencyCode::Zar ; "mixed case")]
    fn parses_known_codes(input: &str, expected: CurrencyCode) {
        assert_eq!(input.parse::<CurrencyCode>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_code() {
        let err = "XYZ".parse::<CurrencyCode>().unwrap_err();
        assert_eq!(err, UnknownCurrency("XYZ".to_string()));
        assert_eq!(err.to_string(), "unknown currency code: XYZ");
    }

    #[test]
    fn as_str_round_trips_for_every_code() {
        for code in CurrencyCode::all() {
            assert_eq!(code.as_str().parse::<CurrencyCode>().unwrap(), *code);
        }
    }

    #[test]
    fn only_euro_is_reference() {
        assert!(CurrencyCode::REFERENCE.is_reference());
        let others = CurrencyCode::all()
            .iter()
            .filter(|c| c.is_reference())
            .count();
        assert_eq!(others, 1);
    }

    #[test]
    fn pair_display_and_self_pair() {
        let pair = RatePair::new(CurrencyCode::Eur, CurrencyCode::Usd);
        assert_eq!(pair.to_string(), "EUR/USD");
        assert!(!pair.is_self_pair());
        assert!(RatePair::new(CurrencyCode::Gbp, CurrencyCode::Gbp).is_self_pair());
    }
}
