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
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// Shared [`VenueAdapter`] for Binance spot and USD-M futures, which differ only in endpoint
/// and in whether funding-rate/mark-price data exists for the instrument class.
#[derive(Debug)]
pub struct BinanceAdapter {
    exchange: ExchangeId,
    next_request_id: AtomicU64,
}

impl BinanceAdapter {
    pub fn spot() -> Self {
        Self {
            exchange: ExchangeId::BinanceSpot,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn futures_usd() -> Self {
        Self {
            exchange: ExchangeId::BinanceFuturesUsd,
            next_request_id: AtomicU64::new(1),
        }
    }

    fn base_url(&self) -> &'static str {
        match self.exchange {
            ExchangeId::BinanceFuturesUsd => "wss://fstream.binance.com/stream",
            _ => "wss://stream.binance.com:9443/stream",
        }
    }

    fn stream_name(&self, key: &SubscriptionKey) -> String {
        let symbol = self.to_venue_symbol(&key.symbol, key.kind);
        match key.kind {
            DataKind::Ticker => format!("{symbol}@ticker"),
            DataKind::Depth => format!("{symbol}@depth20@100ms"),
            DataKind::Trade => format!("{symbol}@trade"),
            DataKind::FundingRate => format!("{symbol}@markPrice@1s"),
            DataKind::Kline => format!("{symbol}@kline_1h"),
        }
    }

    fn request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn op_frame(&self, op: &str, keys: &[SubscriptionKey]) -> Vec<String> {
        let streams: Vec<String> = keys.iter().map(|key| self.stream_name(key)).collect();
        let frame = json!({
            "method": op,
            "params": streams,
            "id": self.request_id(),
        });
        vec![frame.to_string()]
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, _kind: DataKind) -> String {
        format!("{}{}", symbol.base(), symbol.quote()).to_lowercase()
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol> {
        // Binance symbols carry no separator; split against the common quote-probe list.
        const QUOTES: [&str; 6] = ["USDT", "USDC", "FDUSD", "BUSD", "BTC", "ETH"];
        let upper = venue_symbol.to_uppercase();
        QUOTES.iter().find_map(|quote| {
            upper
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(|base| CanonicalSymbol::new(base, *quote))
        })
    }

    async fn open_session(&self, _http: &reqwest::Client) -> Result<Session, DataError> {
        let url = Url::parse(&format!("{}?streams=", self.base_url()))
            .map_err(|e| DataError::Handshake {
                exchange: self.exchange,
                reason: e.to_string(),
            })?;
        Ok(Session::new(url, std::time::Duration::from_secs(180)))
    }

    fn build_subscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.op_frame("SUBSCRIBE", keys)
    }

    fn build_unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.op_frame("UNSUBSCRIBE", keys)
    }

    fn heartbeat_frame(&self) -> Option<String> {
        // Binance relies on transport-level WebSocket ping/pong; no application ping needed.
        None
    }

    fn dispatch(&self, payload: &str) -> InboundFrame {
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return InboundFrame::Other;
        };

        if value.get("result").is_some() && value.get("id").is_some() {
            return InboundFrame::SubscriptionAck;
        }
        if let Some(error) = value.get("error") {
            return InboundFrame::Error(error.to_string());
        }
        match (value.get("stream"), value.get("data")) {
            (Some(Value::String(stream)), Some(data)) => InboundFrame::Data {
                channel: stream.clone(),
                instrument_id: None,
                payload: data.clone(),
            },
            _ => InboundFrame::Other,
        }
    }

    fn normalize(
        &self,
        channel: &str,
        _instrument_id: Option<&str>,
        payload: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<CanonicalRecord> {
        let Some(symbol_raw) = payload.get("s").and_then(Value::as_str) else {
            return Vec::new();
        };
        let Some(symbol) = self.from_venue_symbol(symbol_raw) else {
            return Vec::new();
        };

        let exchange_timestamp = payload
            .get("E")
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis);
        let meta = |exchange_timestamp: Option<DateTime<Utc>>| RecordMeta {
            venue: self.exchange,
            symbol: symbol.clone(),
            exchange_timestamp,
            local_timestamp,
            unified_timestamp: crate::clock::unified_timestamp(exchange_timestamp, local_timestamp),
        };

        if channel.ends_with("@ticker") {
            let Some(last) = payload.get("c").and_then(parse_f64_from) else {
                return Vec::new();
            };
            return vec![CanonicalRecord::Ticker(Ticker {
                meta: meta(exchange_timestamp),
                last,
                bid: payload.get("b").and_then(parse_f64_from).unwrap_or_default(),
                bid_size: payload.get("B").and_then(parse_f64_from).unwrap_or_default(),
                ask: payload.get("a").and_then(parse_f64_from).unwrap_or_default(),
                ask_size: payload.get("A").and_then(parse_f64_from).unwrap_or_default(),
                open: payload.get("o").and_then(parse_f64_from).unwrap_or_default(),
                high: payload.get("h").and_then(parse_f64_from).unwrap_or_default(),
                low: payload.get("l").and_then(parse_f64_from).unwrap_or_default(),
                volume: payload.get("v").and_then(parse_f64_from).unwrap_or_default(),
                quote_volume: payload.get("q").and_then(parse_f64_from).unwrap_or_default(),
                change: payload.get("p").and_then(parse_f64_from).unwrap_or_default(),
                change_percent: payload.get("P").and_then(parse_f64_from).unwrap_or_default(),
                mark_price: None,
                index_price: None,
                funding_rate: None,
                next_funding_time: None,
            })];
        }

        if channel.contains("@depth") {
            let to_levels = |side: &Value| -> Vec<PriceLevel> {
                side.as_array()
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
            return vec![CanonicalRecord::Depth(Depth {
                meta: meta(exchange_timestamp),
                bids: to_levels(payload.get("bids").unwrap_or(&Value::Null)),
                asks: to_levels(payload.get("asks").unwrap_or(&Value::Null)),
            })];
        }

        if channel.ends_with("@trade") {
            let Some(price) = payload.get("p").and_then(parse_f64_from) else {
                return Vec::new();
            };
            let side = if payload.get("m").and_then(Value::as_bool).unwrap_or(false) {
                Side::Sell
            } else {
                Side::Buy
            };
            return vec![CanonicalRecord::Trade(Trade {
                meta: meta(exchange_timestamp),
                trade_id: payload
                    .get("t")
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                price,
                amount: payload.get("q").and_then(parse_f64_from).unwrap_or_default(),
                side,
            })];
        }

        if channel.contains("@markPrice") {
            let Some(funding_rate) = payload.get("r").and_then(parse_f64_from) else {
                return Vec::new();
            };
            return vec![CanonicalRecord::FundingRate(FundingRate {
                meta: meta(exchange_timestamp),
                funding_rate,
                mark_price: payload.get("p").and_then(parse_f64_from),
                index_price: payload.get("i").and_then(parse_f64_from),
                next_funding_time: payload
                    .get("T")
                    .and_then(Value::as_i64)
                    .and_then(DateTime::from_timestamp_millis),
                predicted_next_funding_rate: None,
            })];
        }

        if channel.contains("@kline") {
            let Some(candle) = payload.get("k") else {
                return Vec::new();
            };
            let Some(open) = candle.get("o").and_then(parse_f64_from) else {
                return Vec::new();
            };
            let open_time = candle
                .get("t")
                .and_then(Value::as_i64)
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or(local_timestamp);
            let close_time = candle
                .get("T")
                .and_then(Value::as_i64)
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or(local_timestamp);
            return vec![CanonicalRecord::Kline(Kline {
                meta: meta(exchange_timestamp),
                interval: candle
                    .get("i")
                    .and_then(Value::as_str)
                    .unwrap_or("1h")
                    .to_string(),
                open_time,
                close_time,
                open,
                high: candle.get("h").and_then(parse_f64_from).unwrap_or_default(),
                low: candle.get("l").and_then(parse_f64_from).unwrap_or_default(),
                close: candle.get("c").and_then(parse_f64_from).unwrap_or_default(),
                volume: candle.get("v").and_then(parse_f64_from).unwrap_or_default(),
                quote_volume: candle.get("q").and_then(parse_f64_from).unwrap_or_default(),
                trades: candle.get("n").and_then(Value::as_u64).unwrap_or_default(),
                is_closed: candle.get("x").and_then(Value::as_bool).unwrap_or(false),
            })];
        }

        Vec::new()
    }

    fn max_subscriptions_per_connection(&self) -> Option<usize> {
        Some(100)
    }

    fn supports_combined_subscribe_at_connect(&self) -> bool {
        true
    }
}

fn parse_f64_from(value: &Value) -> Option<f64> {
    parse_optional_f64(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_codec_roundtrip() {
        let adapter = BinanceAdapter::spot();
        let symbol = CanonicalSymbol::new("BTC", "USDT");
        let venue_symbol = adapter.to_venue_symbol(&symbol, DataKind::Trade);
        assert_eq!(venue_symbol, "btcusdt");
        assert_eq!(adapter.from_venue_symbol(&venue_symbol), Some(symbol));
    }

    #[test]
    fn test_normalize_ticker_matches_spec_scenario_a() {
        let adapter = BinanceAdapter::spot();
        let payload: Value = serde_json::from_str(
            r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"50000","b":"49999","B":"1","a":"50001","A":"2","o":"49000","h":"51000","l":"48000","v":"1000","q":"50000000","p":"1000","P":"2.04"}"#,
        )
        .unwrap();

        let records = adapter.normalize("btcusdt@ticker", None, &payload, Utc::now());
        assert_eq!(records.len(), 1);
        let CanonicalRecord::Ticker(ticker) = &records[0] else {
            panic!("expected Ticker");
        };
        assert_eq!(ticker.meta.symbol, CanonicalSymbol::new("BTC", "USDT"));
        assert_eq!(ticker.last, 50_000.0);
        assert_eq!(ticker.bid, 49_999.0);
        assert_eq!(ticker.ask, 50_001.0);
        assert_eq!(
            ticker.meta.exchange_timestamp,
            DateTime::from_timestamp_millis(1_700_000_000_000)
        );
    }

    #[test]
    fn test_dispatch_unwraps_combined_stream_envelope() {
        let adapter = BinanceAdapter::spot();
        let frame = adapter.dispatch(r#"{"stream":"btcusdt@trade","data":{"e":"trade"}}"#);
        match frame {
            InboundFrame::Data { channel, .. } => assert_eq!(channel, "btcusdt@trade"),
            _ => panic!("expected Data frame"),
        }
    }

    #[test]
    fn test_build_subscribe_shape() {
        let adapter = BinanceAdapter::spot();
        let key = SubscriptionKey::new(DataKind::Trade, CanonicalSymbol::new("BTC", "USDT"));
        let frames = adapter.build_subscribe(&[key]);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["method"], "SUBSCRIBE");
        assert_eq!(value["params"][0], "btcusdt@trade");
    }
}
