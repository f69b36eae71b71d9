use crate::{
    adapter::{InboundFrame, Session, TradingClass, VenueAdapter, parse_f64, parse_optional_f64},
    error::DataError,
    kind::{DataKind, SubscriptionKey},
    record::{CanonicalRecord, Depth, FundingRate, Kline, PriceLevel, RecordMeta, Ticker, Trade},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketfeed_instrument::{Side, exchange::ExchangeId, symbol::CanonicalSymbol};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

#[derive(Debug, Deserialize)]
struct BulletResponse {
    data: BulletData,
}

#[derive(Debug, Deserialize)]
struct BulletData {
    token: String,
    #[serde(rename = "instanceServers")]
    instance_servers: Vec<BulletServer>,
}

#[derive(Debug, Deserialize)]
struct BulletServer {
    endpoint: String,
    #[serde(rename = "pingInterval")]
    ping_interval: u64,
}

/// KuCoin requires a pre-session HTTP handshake (the "bullet") that returns a short-lived token,
/// a connect id, and the server-mandated heartbeat interval; the WS URL is assembled from these.
#[derive(Debug)]
pub struct KucoinAdapter {
    class: TradingClass,
    request_id: AtomicU64,
}

impl KucoinAdapter {
    pub fn new(class: TradingClass) -> Self {
        Self {
            class,
            request_id: AtomicU64::new(1),
        }
    }

    fn bullet_url(&self) -> &'static str {
        match self.class {
            TradingClass::Spot => "https://api.kucoin.com/api/v1/bullet-public",
            TradingClass::Perpetual => "https://api-futures.kucoin.com/api/v1/bullet-public",
        }
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn topic(&self, key: &SubscriptionKey) -> String {
        let symbol = self.to_venue_symbol(&key.symbol, key.kind);
        match self.class {
            TradingClass::Spot => match key.kind {
                DataKind::Ticker | DataKind::FundingRate => format!("/market/ticker:{symbol}"),
                DataKind::Depth => format!("/market/level2Depth5:{symbol}"),
                DataKind::Trade => format!("/market/match:{symbol}"),
                DataKind::Kline => format!("/market/candles:{symbol}_1hour"),
            },
            TradingClass::Perpetual => match key.kind {
                DataKind::Ticker | DataKind::FundingRate => format!("/contractMarket/tickerV2:{symbol}"),
                DataKind::Depth => format!("/contractMarket/level2Depth5:{symbol}"),
                DataKind::Trade => format!("/contractMarket/execution:{symbol}"),
                DataKind::Kline => format!("/contractMarket/candle:{symbol}_1hour"),
            },
        }
    }

    fn topic_frame(&self, frame_type: &str, keys: &[SubscriptionKey]) -> Vec<String> {
        keys.iter()
            .map(|key| {
                json!({
                    "id": self.next_id(),
                    "type": frame_type,
                    "topic": self.topic(key),
                    "privateChannel": false,
                    "response": true,
                })
                .to_string()
            })
            .collect()
    }
}

#[async_trait]
impl VenueAdapter for KucoinAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Kucoin
    }

    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, _kind: DataKind) -> String {
        format!("{}-{}", symbol.base(), symbol.quote())
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol> {
        let (base, quote) = venue_symbol.split_once('-')?;
        Some(CanonicalSymbol::new(base, quote))
    }

    async fn open_session(&self, http: &reqwest::Client) -> Result<Session, DataError> {
        let response = http
            .post(self.bullet_url())
            .send()
            .await
            .map_err(|e| DataError::Handshake {
                exchange: self.exchange(),
                reason: e.to_string(),
            })?;
        let bullet: BulletResponse = response
            .json()
            .await
            .map_err(|e| DataError::Handshake {
                exchange: self.exchange(),
                reason: e.to_string(),
            })?;
        let server = bullet
            .data
            .instance_servers
            .into_iter()
            .next()
            .ok_or_else(|| DataError::Handshake {
                exchange: self.exchange(),
                reason: "bullet response carried no instance servers".to_string(),
            })?;

        let connect_id = self.next_id();
        let url = format!(
            "{}?token={}&connectId={}",
            server.endpoint, bullet.data.token, connect_id
        );
        let url = Url::parse(&url).map_err(|e| DataError::Handshake {
            exchange: self.exchange(),
            reason: e.to_string(),
        })?;
        Ok(Session::new(
            url,
            std::time::Duration::from_millis(server.ping_interval),
        ))
    }

    fn build_subscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.topic_frame("subscribe", keys)
    }

    fn build_unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.topic_frame("unsubscribe", keys)
    }

    fn heartbeat_frame(&self) -> Option<String> {
        Some(json!({ "id": self.next_id(), "type": "ping" }).to_string())
    }

    fn dispatch(&self, payload: &str) -> InboundFrame {
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return InboundFrame::Other;
        };
        match value.get("type").and_then(Value::as_str) {
            Some("pong") => return InboundFrame::HeartbeatReply,
            Some("ack") => return InboundFrame::SubscriptionAck,
            Some("error") => {
                return InboundFrame::Error(
                    value
                        .get("data")
                        .and_then(Value::as_str)
                        .unwrap_or("kucoin error")
                        .to_string(),
                );
            }
            Some("message") => {
                if let (Some(Value::String(topic)), Some(data)) =
                    (value.get("topic"), value.get("data"))
                {
                    return InboundFrame::Data {
                        channel: topic.clone(),
                        instrument_id: None,
                        payload: data.clone(),
                    };
                }
            }
            _ => {}
        }
        InboundFrame::Other
    }

    fn normalize(
        &self,
        channel: &str,
        _instrument_id: Option<&str>,
        payload: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<CanonicalRecord> {
        let Some((prefix, rest)) = channel.split_once(':') else {
            return Vec::new();
        };
        let symbol_segment = rest.split('_').next().unwrap_or(rest);
        let Some(symbol) = self.from_venue_symbol(symbol_segment) else {
            return Vec::new();
        };

        let meta = RecordMeta {
            venue: self.exchange(),
            symbol: symbol.clone(),
            exchange_timestamp: payload
                .get("time")
                .and_then(Value::as_i64)
                .and_then(DateTime::from_timestamp_millis),
            local_timestamp,
            unified_timestamp: crate::clock::unified_timestamp(
                payload
                    .get("time")
                    .and_then(Value::as_i64)
                    .and_then(DateTime::from_timestamp_millis),
                local_timestamp,
            ),
        };

        match prefix {
            "/market/ticker" | "/contractMarket/tickerV2" => {
                let Some(last) = field(payload, "price").or_else(|| field(payload, "lastTradePrice"))
                else {
                    return Vec::new();
                };
                vec![CanonicalRecord::Ticker(Ticker {
                    meta,
                    last,
                    bid: field(payload, "bestBid").unwrap_or_default(),
                    bid_size: field(payload, "bestBidSize").unwrap_or_default(),
                    ask: field(payload, "bestAsk").unwrap_or_default(),
                    ask_size: field(payload, "bestAskSize").unwrap_or_default(),
                    open: 0.0,
                    high: 0.0,
                    low: 0.0,
                    volume: 0.0,
                    quote_volume: 0.0,
                    change: 0.0,
                    change_percent: 0.0,
                    mark_price: None,
                    index_price: None,
                    funding_rate: None,
                    next_funding_time: None,
                })]
            }
            "/market/level2Depth5" | "/contractMarket/level2Depth5" => {
                let levels = |key: &str| -> Vec<PriceLevel> {
                    payload
                        .get(key)
                        .and_then(Value::as_array)
                        .map(|levels| {
                            levels
                                .iter()
                                .filter_map(|level| {
                                    let level = level.as_array()?;
                                    Some(PriceLevel {
                                        price: parse_f64(level.first()?)?,
                                        size: parse_f64(level.get(1)?)?,
                                    })
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                };
                vec![CanonicalRecord::Depth(Depth {
                    meta,
                    bids: levels("bids"),
                    asks: levels("asks"),
                })]
            }
            "/market/match" | "/contractMarket/execution" => {
                let Some(price) = field(payload, "price") else {
                    return Vec::new();
                };
                let side = match payload.get("side").and_then(Value::as_str) {
                    Some("sell") => Side::Sell,
                    _ => Side::Buy,
                };
                vec![CanonicalRecord::Trade(Trade {
                    meta,
                    trade_id: payload
                        .get("tradeId")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    price,
                    amount: field(payload, "size").unwrap_or_default(),
                    side,
                })]
            }
            "/market/candles" | "/contractMarket/candle" => {
                let Some(row) = payload.get("candles").and_then(Value::as_array) else {
                    return Vec::new();
                };
                let Some(open_time_s) = row.first().and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok())
                else {
                    return Vec::new();
                };
                let Some(open_time) = DateTime::from_timestamp(open_time_s, 0) else {
                    return Vec::new();
                };
                vec![CanonicalRecord::Kline(Kline {
                    meta: RecordMeta {
                        exchange_timestamp: Some(open_time),
                        unified_timestamp: crate::clock::unified_timestamp(
                            Some(open_time),
                            local_timestamp,
                        ),
                        ..meta
                    },
                    interval: "1hour".to_string(),
                    open_time,
                    close_time: open_time + chrono::Duration::hours(1),
                    open: row.get(1).and_then(parse_f64).unwrap_or_default(),
                    close: row.get(2).and_then(parse_f64).unwrap_or_default(),
                    high: row.get(3).and_then(parse_f64).unwrap_or_default(),
                    low: row.get(4).and_then(parse_f64).unwrap_or_default(),
                    volume: row.get(5).and_then(parse_f64).unwrap_or_default(),
                    quote_volume: row.get(6).and_then(parse_f64).unwrap_or_default(),
                    trades: 0,
                    is_closed: false,
                })]
            }
            _ => Vec::new(),
        }
    }

    fn max_subscriptions_per_connection(&self) -> Option<usize> {
        Some(300)
    }
}

fn field(value: &Value, key: &str) -> Option<f64> {
    parse_optional_f64(value.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_codec_roundtrip() {
        let adapter = KucoinAdapter::new(TradingClass::Spot);
        let symbol = CanonicalSymbol::new("BTC", "USDT");
        let venue_symbol = adapter.to_venue_symbol(&symbol, DataKind::Ticker);
        assert_eq!(venue_symbol, "BTC-USDT");
        assert_eq!(adapter.from_venue_symbol(&venue_symbol), Some(symbol));
    }

    #[test]
    fn test_build_subscribe_shape() {
        let adapter = KucoinAdapter::new(TradingClass::Spot);
        let key = SubscriptionKey::new(DataKind::Trade, CanonicalSymbol::new("BTC", "USDT"));
        let frames = adapter.build_subscribe(&[key]);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["topic"], "/market/match:BTC-USDT");
        assert_eq!(value["privateChannel"], false);
    }

    #[test]
    fn test_normalize_ticker() {
        let adapter = KucoinAdapter::new(TradingClass::Spot);
        let payload: Value = serde_json::from_str(
            r#"{"price":"50000","bestBid":"49999","bestAsk":"50001","time":1700000000000}"#,
        )
        .unwrap();
        let records = adapter.normalize("/market/ticker:BTC-USDT", None, &payload, Utc::now());
        let CanonicalRecord::Ticker(ticker) = &records[0] else {
            panic!("expected Ticker");
        };
        assert_eq!(ticker.meta.symbol, CanonicalSymbol::new("BTC", "USDT"));
        assert_eq!(ticker.last, 50_000.0);
    }
}
