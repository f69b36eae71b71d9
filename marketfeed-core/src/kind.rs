use marketfeed_instrument::symbol::CanonicalSymbol;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The kind of normalized market data record a subscription requests.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DataKind {
    Ticker,
    Depth,
    Trade,
    FundingRate,
    Kline,
}

impl DataKind {
    pub const ALL: [DataKind; 5] = [
        DataKind::Ticker,
        DataKind::Depth,
        DataKind::Trade,
        DataKind::FundingRate,
        DataKind::Kline,
    ];
}

impl Display for DataKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataKind::Ticker => "ticker",
            DataKind::Depth => "depth",
            DataKind::Trade => "trade",
            DataKind::FundingRate => "fundingRate",
            DataKind::Kline => "kline",
        };
        write!(f, "{name}")
    }
}

/// Identifies a subscription within a single venue: `(DataKind, canonical symbol)`.
///
/// Combined with an [`marketfeed_instrument::exchange::ExchangeId`] this forms the globally
/// unique subscription identity the Subscription Registry tracks.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionKey {
    pub kind: DataKind,
    pub symbol: CanonicalSymbol,
}

impl SubscriptionKey {
    pub fn new(kind: DataKind, symbol: CanonicalSymbol) -> Self {
        Self { kind, symbol }
    }
}

impl Display for SubscriptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.symbol)
    }
}
