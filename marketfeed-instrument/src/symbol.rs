use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Canonical representation of a tradable instrument: `BASE/QUOTE` (e.g. `BTC/USDT`).
///
/// This is the key used throughout the engine — the Subscription Registry, the in-memory
/// Cache, and the external store all key off this form. Venue-native identifiers are never
/// used as keys; each [`crate::exchange::ExchangeId`] adapter is responsible for translating
/// to/from this canonical form.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[display("{base}/{quote}")]
pub struct CanonicalSymbol {
    base: String,
    quote: String,
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
#[error("invalid canonical symbol '{0}', expected BASE/QUOTE")]
pub struct CanonicalSymbolParseError(String);

impl CanonicalSymbol {
    pub fn new<B, Q>(base: B, quote: Q) -> Self
    where
        B: Into<String>,
        Q: Into<String>,
    {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }
}

impl FromStr for CanonicalSymbol {
    type Err = CanonicalSymbolParseError;

    /// Parse a canonical `BASE/QUOTE` symbol.
    ///
    /// Some venues express a perpetual instrument with a trailing `:QUOTE` settlement-asset
    /// suffix (eg/ `BTC/USDT:USDT`); that suffix is stripped before constructing the
    /// canonical two-part registry key.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let without_settlement_suffix = input.split(':').next().unwrap_or(input);

        let Some((base, quote)) = without_settlement_suffix.split_once('/') else {
            return Err(CanonicalSymbolParseError(input.to_string()));
        };

        if base.is_empty() || quote.is_empty() {
            return Err(CanonicalSymbolParseError(input.to_string()));
        }

        Ok(Self::new(base, quote))
    }
}

impl TryFrom<String> for CanonicalSymbol {
    type Error = CanonicalSymbolParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CanonicalSymbol> for String {
    fn from(value: CanonicalSymbol) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        assert_eq!(
            "BTC/USDT".parse::<CanonicalSymbol>().unwrap(),
            CanonicalSymbol::new("BTC", "USDT")
        );
    }

    #[test]
    fn test_parse_strips_settlement_suffix() {
        assert_eq!(
            "BTC/USDT:USDT".parse::<CanonicalSymbol>().unwrap(),
            CanonicalSymbol::new("BTC", "USDT")
        );
    }

    #[test]
    fn test_parse_lowercase_is_normalised() {
        assert_eq!(
            "btc/usdt".parse::<CanonicalSymbol>().unwrap(),
            CanonicalSymbol::new("BTC", "USDT")
        );
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!("BTCUSDT".parse::<CanonicalSymbol>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let symbol = CanonicalSymbol::new("BTC", "USDT");
        assert_eq!(symbol.to_string(), "BTC/USDT");
        assert_eq!(symbol.to_string().parse::<CanonicalSymbol>().unwrap(), symbol);
    }
}
