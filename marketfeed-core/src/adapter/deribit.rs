use crate::{
    adapter::{InboundFrame, Session, VenueAdapter, parse_f64, parse_optional_f64},
    error::DataError,
    kind::{DataKind, SubscriptionKey},
    record::{CanonicalRecord, Depth, FundingRate, Kline, PriceLevel, RecordMeta, Ticker, Trade},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketfeed_instrument::{Side, exchange::ExchangeId, symbol::CanonicalSymbol};
use serde_json::{Value, json};
use url::Url;

/// Deribit speaks JSON-RPC 2.0 over the socket rather than a bespoke envelope; every request
/// carries a client-chosen `id` and every push arrives as a `subscription` notification wrapping
/// `params.channel` / `params.data`.
#[derive(Debug)]
pub struct DeribitAdapter {
    use_testnet: bool,
}

impl DeribitAdapter {
    pub fn new(use_testnet: bool) -> Self {
        Self { use_testnet }
    }

    fn channel(&self, inst: &str, kind: DataKind) -> String {
        match kind {
            DataKind::Ticker | DataKind::FundingRate => format!("ticker.{inst}.100ms"),
            DataKind::Depth => format!("book.{inst}.none.10.100ms"),
            DataKind::Trade => format!("trades.{inst}.100ms"),
            DataKind::Kline => format!("chart.trades.{inst}.60"),
        }
    }

    fn rpc_frame(&self, method: &str, channels: Vec<String>) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": { "channels": channels },
        })
        .to_string()
    }

    /// The instrument identifier segment of a channel string, at the position fixed by that
    /// channel family (`chart.trades.<inst>.<res>` nests one level deeper than the rest).
    fn instrument_from_channel(channel: &str) -> Option<&str> {
        let mut parts = channel.split('.');
        if channel.starts_with("chart.trades.") {
            parts.nth(2)
        } else {
            parts.nth(1)
        }
    }
}

#[async_trait]
impl VenueAdapter for DeribitAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Deribit
    }

    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, _kind: DataKind) -> String {
        format!("{}-PERPETUAL", symbol.base())
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol> {
        let base = venue_symbol.strip_suffix("-PERPETUAL")?;
        Some(CanonicalSymbol::new(base, "USD"))
    }

    async fn open_session(&self, _http: &reqwest::Client) -> Result<Session, DataError> {
        let host = if self.use_testnet {
            "test.deribit.com"
        } else {
            "www.deribit.com"
        };
        let url = Url::parse(&format!("wss://{host}/ws/api/v2")).map_err(|e| {
            DataError::Handshake {
                exchange: self.exchange(),
                reason: e.to_string(),
            }
        })?;
        Ok(Session::new(url, std::time::Duration::from_secs(30)))
    }

    fn build_subscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        let channels = keys
            .iter()
            .map(|key| self.channel(&self.to_venue_symbol(&key.symbol, key.kind), key.kind))
            .collect();
        vec![self.rpc_frame("public/subscribe", channels)]
    }

    fn build_unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        let channels = keys
            .iter()
            .map(|key| self.channel(&self.to_venue_symbol(&key.symbol, key.kind), key.kind))
            .collect();
        vec![self.rpc_frame("public/unsubscribe", channels)]
    }

    fn heartbeat_frame(&self) -> Option<String> {
        Some(json!({ "jsonrpc": "2.0", "id": 0, "method": "public/test", "params": {} }).to_string())
    }

    fn dispatch(&self, payload: &str) -> InboundFrame {
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return InboundFrame::Other;
        };

        if value.get("method").and_then(Value::as_str) == Some("heartbeat") {
            return InboundFrame::HeartbeatReply;
        }
        if let Some(error) = value.get("error") {
            return InboundFrame::Error(
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("deribit error")
                    .to_string(),
            );
        }
        if value.get("result").is_some() {
            return InboundFrame::SubscriptionAck;
        }
        if value.get("method").and_then(Value::as_str) == Some("subscription") {
            let params = value.get("params");
            let channel = params.and_then(|p| p.get("channel")).and_then(Value::as_str);
            let data = params.and_then(|p| p.get("data"));
            if let (Some(channel), Some(data)) = (channel, data) {
                return InboundFrame::Data {
                    channel: channel.to_string(),
                    instrument_id: None,
                    payload: data.clone(),
                };
            }
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
        let Some(inst) = Self::instrument_from_channel(channel) else {
            return Vec::new();
        };
        let Some(symbol) = self.from_venue_symbol(inst) else {
            return Vec::new();
        };

        let meta_for = |ts_ms: Option<i64>| {
            let exchange_timestamp = ts_ms.and_then(DateTime::from_timestamp_millis);
            RecordMeta {
                venue: self.exchange(),
                symbol: symbol.clone(),
                exchange_timestamp,
                local_timestamp,
                unified_timestamp: crate::clock::unified_timestamp(
                    exchange_timestamp,
                    local_timestamp,
                ),
            }
        };

        if channel.starts_with("ticker.") {
            let Some(last) = field(payload, "last_price") else {
                return Vec::new();
            };
            let ts_ms = payload.get("timestamp").and_then(Value::as_i64);
            let open = field(payload, "stats")
                .or_else(|| field(payload, "open_interest"))
                .unwrap_or(last);
            let mut records = vec![CanonicalRecord::Ticker(Ticker {
                meta: meta_for(ts_ms),
                last,
                bid: field(payload, "best_bid_price").unwrap_or_default(),
                bid_size: field(payload, "best_bid_amount").unwrap_or_default(),
                ask: field(payload, "best_ask_price").unwrap_or_default(),
                ask_size: field(payload, "best_ask_amount").unwrap_or_default(),
                open,
                high: payload
                    .get("stats")
                    .and_then(|s| field(s, "high"))
                    .unwrap_or_default(),
                low: payload
                    .get("stats")
                    .and_then(|s| field(s, "low"))
                    .unwrap_or_default(),
                volume: payload
                    .get("stats")
                    .and_then(|s| field(s, "volume"))
                    .unwrap_or_default(),
                quote_volume: 0.0,
                change: 0.0,
                change_percent: payload
                    .get("stats")
                    .and_then(|s| field(s, "price_change"))
                    .unwrap_or_default(),
                mark_price: field(payload, "mark_price"),
                index_price: field(payload, "index_price"),
                funding_rate: field(payload, "current_funding"),
                next_funding_time: None,
            })];

            if let Some(funding_rate) = field(payload, "current_funding") {
                records.push(CanonicalRecord::FundingRate(FundingRate {
                    meta: meta_for(ts_ms),
                    funding_rate,
                    mark_price: field(payload, "mark_price"),
                    index_price: field(payload, "index_price"),
                    next_funding_time: None,
                    predicted_next_funding_rate: field(payload, "funding_8h"),
                }));
            }

            return records;
        }

        if channel.starts_with("book.") {
            let ts_ms = payload.get("timestamp").and_then(Value::as_i64);
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
                                    price: parse_f64(level.get(1)?)?,
                                    size: parse_f64(level.get(2)?)?,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            };
            return vec![CanonicalRecord::Depth(Depth {
                meta: meta_for(ts_ms),
                bids: levels("bids"),
                asks: levels("asks"),
            })];
        }

        if channel.starts_with("trades.") {
            let Some(trades) = payload.as_array() else {
                return Vec::new();
            };
            return trades
                .iter()
                .filter_map(|trade| {
                    let price = parse_optional_f64(trade.get("price"))?;
                    let side = match trade.get("direction").and_then(Value::as_str) {
                        Some("sell") => Side::Sell,
                        _ => Side::Buy,
                    };
                    Some(CanonicalRecord::Trade(Trade {
                        meta: meta_for(trade.get("timestamp").and_then(Value::as_i64)),
                        trade_id: trade
                            .get("trade_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        price,
                        amount: field(trade, "amount").unwrap_or_default(),
                        side,
                    }))
                })
                .collect();
        }

        if channel.starts_with("chart.trades.") {
            let Some(ticks) = payload.as_array() else {
                return Vec::new();
            };
            return ticks
                .iter()
                .filter_map(|candle| {
                    let open_time_ms = candle.get("tick")?.as_i64()?;
                    let open_time = DateTime::from_timestamp_millis(open_time_ms)?;
                    Some(CanonicalRecord::Kline(Kline {
                        meta: RecordMeta {
                            venue: self.exchange(),
                            symbol: symbol.clone(),
                            exchange_timestamp: Some(open_time),
                            local_timestamp,
                            unified_timestamp: crate::clock::unified_timestamp(
                                Some(open_time),
                                local_timestamp,
                            ),
                        },
                        interval: "60".to_string(),
                        open_time,
                        close_time: open_time + chrono::Duration::minutes(1),
                        open: field(candle, "open").unwrap_or_default(),
                        high: field(candle, "high").unwrap_or_default(),
                        low: field(candle, "low").unwrap_or_default(),
                        close: field(candle, "close").unwrap_or_default(),
                        volume: field(candle, "volume").unwrap_or_default(),
                        quote_volume: 0.0,
                        trades: 0,
                        is_closed: true,
                    }))
                })
                .collect();
        }

        Vec::new()
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
        let adapter = DeribitAdapter::new(false);
        let symbol = CanonicalSymbol::new("BTC", "USD");
        let venue_symbol = adapter.to_venue_symbol(&symbol, DataKind::Ticker);
        assert_eq!(venue_symbol, "BTC-PERPETUAL");
        assert_eq!(adapter.from_venue_symbol(&venue_symbol), Some(symbol));
    }

    #[test]
    fn test_build_subscribe_is_jsonrpc_shape() {
        let adapter = DeribitAdapter::new(false);
        let key = SubscriptionKey::new(DataKind::Trade, CanonicalSymbol::new("BTC", "USD"));
        let frames = adapter.build_subscribe(&[key]);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["method"], "public/subscribe");
        assert_eq!(value["params"]["channels"][0], "trades.BTC-PERPETUAL.100ms");
    }

    #[test]
    fn test_normalize_ticker_with_funding_emits_two_records() {
        let adapter = DeribitAdapter::new(false);
        let payload: Value = serde_json::from_str(
            r#"{"last_price":50000,"best_bid_price":49999,"best_ask_price":50001,"timestamp":1700000000000,"current_funding":0.0001,"funding_8h":0.0002,"mark_price":50000.5,"index_price":49998}"#,
        )
        .unwrap();

        let records = adapter.normalize("ticker.BTC-PERPETUAL.100ms", None, &payload, Utc::now());
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], CanonicalRecord::Ticker(_)));
        assert!(matches!(records[1], CanonicalRecord::FundingRate(_)));
    }

    #[test]
    fn test_dispatch_recognises_heartbeat_request() {
        let adapter = DeribitAdapter::new(false);
        let frame = adapter.dispatch(r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"test_request"}}"#);
        assert!(matches!(frame, InboundFrame::HeartbeatReply));
    }
}
