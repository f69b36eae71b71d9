use async_trait::async_trait;
use marketfeed_core::{
    record::CanonicalRecord,
    sink::{Sink, SinkError},
};
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

/// [`Sink`] backed by Redis, mirroring the external-store surface: snapshot hashes for
/// Ticker/Depth/FundingRate/Kline, an approximately-trimmed stream for Trade, and a publish of
/// every write on a single `market_data` channel.
///
/// Two connections are held deliberately: `store` serves the blocking key/value and stream
/// commands, `publish` is dedicated to `PUBLISH` so a slow store command never delays fan-out
/// to subscribers (and vice versa).
#[derive(Debug)]
pub struct RedisSink {
    key_prefix: String,
    max_len: usize,
    trim_approx: bool,
    store: Mutex<MultiplexedConnection>,
    publish: Mutex<MultiplexedConnection>,
}

impl RedisSink {
    pub async fn connect(url: &str, key_prefix: &str, max_len: usize, trim_approx: bool) -> Result<Self, SinkError> {
        let client = Client::open(url).map_err(|err| SinkError(err.to_string()))?;
        let store = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| SinkError(err.to_string()))?;
        let publish = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| SinkError(err.to_string()))?;
        Ok(Self {
            key_prefix: key_prefix.to_string(),
            max_len,
            trim_approx,
            store: Mutex::new(store),
            publish: Mutex::new(publish),
        })
    }

    fn hash_key(&self, family: &str, symbol: &str) -> String {
        hash_key(&self.key_prefix, family, symbol)
    }

    fn stream_key(&self, venue: &str, symbol: &str) -> String {
        stream_key(&self.key_prefix, venue, symbol)
    }
}

fn hash_key(prefix: &str, family: &str, symbol: &str) -> String {
    format!("{prefix}:{family}:{symbol}")
}

fn stream_key(prefix: &str, venue: &str, symbol: &str) -> String {
    format!("{prefix}:trades:{venue}:{symbol}")
}

#[async_trait]
impl Sink for RedisSink {
    async fn write(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        let meta = record.meta();
        let venue = meta.venue.as_str();
        let symbol = meta.symbol.to_string();
        let payload = serde_json::to_string(record).map_err(|err| SinkError(err.to_string()))?;

        match record {
            CanonicalRecord::Ticker(_) => self.hset("ticker", &symbol, venue, &payload).await?,
            CanonicalRecord::Depth(_) => self.hset("depth", &symbol, venue, &payload).await?,
            CanonicalRecord::FundingRate(_) => self.hset("funding", &symbol, venue, &payload).await?,
            CanonicalRecord::Kline(_) => self.hset("kline", &symbol, venue, &payload).await?,
            CanonicalRecord::Trade(_) => self.xadd_trade(venue, &symbol, &payload).await?,
        }

        let envelope = json!({
            "type": record.kind().to_string(),
            "data": record,
            "timestamp": meta.unified_timestamp.timestamp_millis(),
        });
        let envelope = serde_json::to_string(&envelope).map_err(|err| SinkError(err.to_string()))?;
        let mut publish = self.publish.lock().await;
        let _: i64 = publish
            .publish("market_data", envelope)
            .await
            .map_err(|err| SinkError(err.to_string()))?;
        Ok(())
    }
}

impl RedisSink {
    async fn hset(&self, family: &str, symbol: &str, venue: &str, payload: &str) -> Result<(), SinkError> {
        let key = self.hash_key(family, symbol);
        let field = format!("{venue}:{symbol}");
        let mut store = self.store.lock().await;
        let _: () = store
            .hset(key, field, payload)
            .await
            .map_err(|err| SinkError(err.to_string()))?;
        Ok(())
    }

    async fn xadd_trade(&self, venue: &str, symbol: &str, payload: &str) -> Result<(), SinkError> {
        let key = self.stream_key(venue, symbol);
        let mut store = self.store.lock().await;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&key);
        if self.trim_approx {
            cmd.arg("MAXLEN").arg("~").arg(self.max_len);
        } else {
            cmd.arg("MAXLEN").arg(self.max_len);
        }
        cmd.arg("*").arg("payload").arg(payload);
        let result: Result<String, redis::RedisError> = cmd.query_async(&mut *store).await;
        result.map(|_| ()).map_err(|err| {
            warn!(%key, error = %err, "redis XADD failed");
            SinkError(err.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_uses_configured_prefix() {
        assert_eq!(hash_key("market", "ticker", "BTC/USDT"), "market:ticker:BTC/USDT");
    }

    #[test]
    fn test_stream_key_uses_configured_prefix() {
        assert_eq!(
            stream_key("market", "binance_spot", "BTC/USDT"),
            "market:trades:binance_spot:BTC/USDT"
        );
    }
}
