use crate::kind::DataKind;
use chrono::{DateTime, Utc};
use marketfeed_instrument::{Side, exchange::ExchangeId, symbol::CanonicalSymbol};
use serde::{Deserialize, Serialize};

/// Fields carried by every canonical record, regardless of [`DataKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub venue: ExchangeId,
    pub symbol: CanonicalSymbol,
    pub exchange_timestamp: Option<DateTime<Utc>>,
    pub local_timestamp: DateTime<Utc>,
    pub unified_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub last: f64,
    pub bid: f64,
    pub bid_size: f64,
    pub ask: f64,
    pub ask_size: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub change: f64,
    pub change_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_funding_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Depth {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub trade_id: String,
    pub price: f64,
    pub amount: f64,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub funding_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_funding_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_next_funding_rate: Option<f64>,
}

impl FundingRate {
    /// The pair this record's Cache & Sink dedup gate compares against the last-emitted value.
    pub fn dedup_key(&self) -> (u64, Option<i64>) {
        (
            self.funding_rate.to_bits(),
            self.next_funding_time.map(|t| t.timestamp_millis()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kline {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub interval: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades: u64,
    pub is_closed: bool,
}

/// A normalized record of any [`DataKind`], tagged for the broadcast channel envelope and the
/// in-process event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum CanonicalRecord {
    Ticker(Ticker),
    Depth(Depth),
    Trade(Trade),
    FundingRate(FundingRate),
    Kline(Kline),
}

impl CanonicalRecord {
    pub fn meta(&self) -> &RecordMeta {
        match self {
            CanonicalRecord::Ticker(r) => &r.meta,
            CanonicalRecord::Depth(r) => &r.meta,
            CanonicalRecord::Trade(r) => &r.meta,
            CanonicalRecord::FundingRate(r) => &r.meta,
            CanonicalRecord::Kline(r) => &r.meta,
        }
    }

    pub fn kind(&self) -> DataKind {
        match self {
            CanonicalRecord::Ticker(_) => DataKind::Ticker,
            CanonicalRecord::Depth(_) => DataKind::Depth,
            CanonicalRecord::Trade(_) => DataKind::Trade,
            CanonicalRecord::FundingRate(_) => DataKind::FundingRate,
            CanonicalRecord::Kline(_) => DataKind::Kline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RecordMeta {
        RecordMeta {
            venue: ExchangeId::BinanceSpot,
            symbol: CanonicalSymbol::new("BTC", "USDT"),
            exchange_timestamp: Some(DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()),
            local_timestamp: DateTime::from_timestamp_millis(1_700_000_000_500).unwrap(),
            unified_timestamp: DateTime::from_timestamp_millis(1_700_000_000_250).unwrap(),
        }
    }

    #[test]
    fn test_canonical_record_kind_and_meta_roundtrip() {
        let trade = Trade {
            meta: meta(),
            trade_id: "1".to_string(),
            price: 50_000.0,
            amount: 0.1,
            side: Side::Buy,
        };
        let record = CanonicalRecord::Trade(trade.clone());

        assert_eq!(record.kind(), DataKind::Trade);
        assert_eq!(record.meta(), &trade.meta);
    }

    #[test]
    fn test_funding_rate_dedup_key_stable_for_equal_values() {
        let a = FundingRate {
            meta: meta(),
            funding_rate: 0.0001,
            mark_price: None,
            index_price: None,
            next_funding_time: Some(DateTime::from_timestamp_millis(1_700_100_000_000).unwrap()),
            predicted_next_funding_rate: None,
        };
        let mut b = a.clone();
        b.mark_price = Some(50_000.0);

        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_envelope_serialises_with_type_tag() {
        let record = CanonicalRecord::Ticker(Ticker {
            meta: meta(),
            last: 1.0,
            bid: 1.0,
            bid_size: 1.0,
            ask: 1.0,
            ask_size: 1.0,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            volume: 1.0,
            quote_volume: 1.0,
            change: 0.0,
            change_percent: 0.0,
            mark_price: None,
            index_price: None,
            funding_rate: None,
            next_funding_time: None,
        });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "ticker");
    }
}
