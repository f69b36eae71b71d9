use crate::record::CanonicalRecord;
use async_trait::async_trait;
use std::fmt::Debug;

/// External-store write interface. Implementations (e.g. a Redis sink in the `marketfeed` bin
/// crate) live outside this crate; the engine only depends on this trait so the connection and
/// normalization pipeline never needs to know about Redis, Kafka, or whatever else a deployment
/// chooses.
///
/// Writes are best-effort: a failing sink must not interrupt the in-memory cache/broadcast
/// path. Callers record failures via [`crate::stats::Stats`] rather than propagating them.
#[async_trait]
pub trait Sink: Debug + Send + Sync {
    async fn write(&self, record: &CanonicalRecord) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
#[error("sink write failed: {0}")]
pub struct SinkError(pub String);

/// A [`Sink`] that discards every record. Used when `enableRedis` (or an equivalent store
/// toggle) is off, so the fan-out path never needs an `Option<Box<dyn Sink>>`.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
    async fn write(&self, _record: &CanonicalRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordMeta, Trade};
    use chrono::{DateTime, Utc};
    use marketfeed_instrument::{Side, exchange::ExchangeId, symbol::CanonicalSymbol};

    #[tokio::test]
    async fn test_null_sink_always_succeeds() {
        let now: DateTime<Utc> = DateTime::from_timestamp_millis(0).unwrap();
        let record = CanonicalRecord::Trade(Trade {
            meta: RecordMeta {
                venue: ExchangeId::BinanceSpot,
                symbol: CanonicalSymbol::new("BTC", "USDT"),
                exchange_timestamp: Some(now),
                local_timestamp: now,
                unified_timestamp: now,
            },
            trade_id: "1".to_string(),
            price: 1.0,
            amount: 1.0,
            side: Side::Buy,
        });

        assert!(NullSink.write(&record).await.is_ok());
    }
}
