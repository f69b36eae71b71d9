use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Unique identifier for a venue this engine maintains streaming connections to.
///
/// ### Notes
/// A venue may have a distinct trading class (spot vs. linear-perpetual) served from a
/// different endpoint and wire format, so those are represented as unique variants rather
/// than a separate "trading class" field — this mirrors how each class needs its own
/// subscribe/unsubscribe frame shape and symbol aliasing rules.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename = "exchange", rename_all = "snake_case")]
pub enum ExchangeId {
    BinanceSpot,
    BinanceFuturesUsd,
    BybitSpot,
    BybitPerpetual,
    Okx,
    Deribit,
    GateSpot,
    GatePerpetual,
    Bitget,
    Kucoin,
    KrakenSpot,
    KrakenFutures,
}

impl ExchangeId {
    /// Return the &str representation of this [`ExchangeId`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::BinanceSpot => "binance_spot",
            ExchangeId::BinanceFuturesUsd => "binance_futures_usd",
            ExchangeId::BybitSpot => "bybit_spot",
            ExchangeId::BybitPerpetual => "bybit_perpetual",
            ExchangeId::Okx => "okx",
            ExchangeId::Deribit => "deribit",
            ExchangeId::GateSpot => "gate_spot",
            ExchangeId::GatePerpetual => "gate_perpetual",
            ExchangeId::Bitget => "bitget",
            ExchangeId::Kucoin => "kucoin",
            ExchangeId::KrakenSpot => "kraken_spot",
            ExchangeId::KrakenFutures => "kraken_futures",
        }
    }

    /// Whether this venue/class pair is a linear-perpetual (vs. spot) endpoint.
    pub fn is_perpetual(&self) -> bool {
        matches!(
            self,
            ExchangeId::BinanceFuturesUsd
                | ExchangeId::BybitPerpetual
                | ExchangeId::GatePerpetual
                | ExchangeId::KrakenFutures
        )
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_de_exchange_id() {
        assert_eq!(
            serde_json::from_str::<ExchangeId>(r#""kraken_futures""#).unwrap(),
            ExchangeId::KrakenFutures
        );
    }

    #[test]
    fn test_is_perpetual() {
        assert!(ExchangeId::BinanceFuturesUsd.is_perpetual());
        assert!(!ExchangeId::BinanceSpot.is_perpetual());
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(ExchangeId::Okx.to_string(), "okx");
    }
}
