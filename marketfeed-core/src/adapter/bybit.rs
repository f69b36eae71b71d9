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

#[derive(Debug)]
pub struct BybitAdapter {
    exchange: ExchangeId,
}

impl BybitAdapter {
    pub fn spot() -> Self {
        Self {
            exchange: ExchangeId::BybitSpot,
        }
    }

    pub fn perpetual() -> Self {
        Self {
            exchange: ExchangeId::BybitPerpetual,
        }
    }

    fn base_url(&self) -> &'static str {
        match self.exchange {
            ExchangeId::BybitPerpetual => "wss://stream.bybit.com/v5/public/linear",
            _ => "wss://stream.bybit.com/v5/public/spot",
        }
    }

    fn topic(&self, key: &SubscriptionKey) -> String {
        let symbol = self.to_venue_symbol(&key.symbol, key.kind);
        match key.kind {
            DataKind::Ticker | DataKind::FundingRate => format!("tickers.{symbol}"),
            DataKind::Depth => format!("orderbook.50.{symbol}"),
            DataKind::Trade => format!("publicTrade.{symbol}"),
            DataKind::Kline => format!("kline.60.{symbol}"),
        }
    }

    fn op_frame(&self, op: &str, keys: &[SubscriptionKey]) -> Vec<String> {
        let args: Vec<String> = keys.iter().map(|key| self.topic(key)).collect();
        vec![json!({ "op": op, "args": args }).to_string()]
    }
}

#[async_trait]
impl VenueAdapter for BybitAdapter {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, _kind: DataKind) -> String {
        format!("{}{}", symbol.base(), symbol.quote())
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol> {
        const QUOTES: [&str; 4] = ["USDT", "USDC", "USD", "BTC"];
        QUOTES.iter().find_map(|quote| {
            venue_symbol
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(|base| CanonicalSymbol::new(base, *quote))
        })
    }

    async fn open_session(&self, _http: &reqwest::Client) -> Result<Session, DataError> {
        let url = Url::parse(self.base_url()).map_err(|e| DataError::Handshake {
            exchange: self.exchange,
            reason: e.to_string(),
        })?;
        Ok(Session::new(url, std::time::Duration::from_secs(20)))
    }

    fn build_subscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.op_frame("subscribe", keys)
    }

    fn build_unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.op_frame("unsubscribe", keys)
    }

    fn heartbeat_frame(&self) -> Option<String> {
        Some(json!({ "op": "ping" }).to_string())
    }

    fn dispatch(&self, payload: &str) -> InboundFrame {
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return InboundFrame::Other;
        };

        if value.get("op").and_then(Value::as_str) == Some("ping") {
            return InboundFrame::HeartbeatReply;
        }
        if value.get("success") == Some(&Value::Bool(false)) {
            return InboundFrame::Error(
                value
                    .get("ret_msg")
                    .and_then(Value::as_str)
                    .unwrap_or("bybit error")
                    .to_string(),
            );
        }
        if value.get("op").and_then(Value::as_str) == Some("subscribe") {
            return InboundFrame::SubscriptionAck;
        }
        match (
            value.get("topic").and_then(Value::as_str),
            value.get("data"),
        ) {
            (Some(topic), Some(data)) => InboundFrame::Data {
                channel: topic.to_string(),
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
        let meta_for = |raw: &Value, symbol: CanonicalSymbol| {
            let exchange_timestamp = raw
                .get("ts")
                .and_then(Value::as_i64)
                .or_else(|| raw.get("T").and_then(Value::as_i64))
                .and_then(DateTime::from_timestamp_millis);
            RecordMeta {
                venue: self.exchange,
                symbol,
                exchange_timestamp,
                local_timestamp,
                unified_timestamp: crate::clock::unified_timestamp(
                    exchange_timestamp,
                    local_timestamp,
                ),
            }
        };

        if channel.starts_with("tickers.") {
            let Some(symbol_raw) = payload.get("symbol").and_then(Value::as_str) else {
                return Vec::new();
            };
            let Some(symbol) = self.from_venue_symbol(symbol_raw) else {
                return Vec::new();
            };
            let Some(last) = payload.get("lastPrice").and_then(|v| parse_optional_f64(Some(v)))
            else {
                return Vec::new();
            };

            let mut records = vec![CanonicalRecord::Ticker(Ticker {
                meta: meta_for(payload, symbol.clone()),
                last,
                bid: field_f64(payload, "bid1Price"),
                bid_size: field_f64(payload, "bid1Size"),
                ask: field_f64(payload, "ask1Price"),
                ask_size: field_f64(payload, "ask1Size"),
                open: field_f64(payload, "prevPrice24h"),
                high: field_f64(payload, "highPrice24h"),
                low: field_f64(payload, "lowPrice24h"),
                volume: field_f64(payload, "volume24h"),
                quote_volume: field_f64(payload, "turnover24h"),
                change: 0.0,
                change_percent: field_f64(payload, "price24hPcnt") * 100.0,
                mark_price: optional_field_f64(payload, "markPrice"),
                index_price: optional_field_f64(payload, "indexPrice"),
                funding_rate: optional_field_f64(payload, "fundingRate"),
                next_funding_time: payload
                    .get("nextFundingTime")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<i64>().ok())
                    .and_then(DateTime::from_timestamp_millis),
            })];

            if let Some(funding_rate) = optional_field_f64(payload, "fundingRate") {
                records.push(CanonicalRecord::FundingRate(FundingRate {
                    meta: meta_for(payload, symbol),
                    funding_rate,
                    mark_price: optional_field_f64(payload, "markPrice"),
                    index_price: optional_field_f64(payload, "indexPrice"),
                    next_funding_time: payload
                        .get("nextFundingTime")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<i64>().ok())
                        .and_then(DateTime::from_timestamp_millis),
                    predicted_next_funding_rate: None,
                }));
            }

            return records;
        }

        if channel.starts_with("orderbook.") {
            let Some(symbol_raw) = payload.get("s").and_then(Value::as_str) else {
                return Vec::new();
            };
            let Some(symbol) = self.from_venue_symbol(symbol_raw) else {
                return Vec::new();
            };
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
            return vec![CanonicalRecord::Depth(Depth {
                meta: meta_for(payload, symbol),
                bids: levels("b"),
                asks: levels("a"),
            })];
        }

        if channel.starts_with("publicTrade.") {
            let Some(trades) = payload.as_array() else {
                return Vec::new();
            };
            return trades
                .iter()
                .filter_map(|trade| {
                    let symbol_raw = trade.get("s")?.as_str()?;
                    let symbol = self.from_venue_symbol(symbol_raw)?;
                    let price = parse_optional_f64(trade.get("p"))?;
                    let side = match trade.get("S").and_then(Value::as_str) {
                        Some("Sell") => Side::Sell,
                        _ => Side::Buy,
                    };
                    Some(CanonicalRecord::Trade(Trade {
                        meta: meta_for(trade, symbol),
                        trade_id: trade
                            .get("i")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        price,
                        amount: field_f64(trade, "v"),
                        side,
                    }))
                })
                .collect();
        }

        if channel.starts_with("kline.") {
            let Some(symbol_segment) = channel.split('.').nth(2) else {
                return Vec::new();
            };
            let Some(symbol) = self.from_venue_symbol(symbol_segment) else {
                return Vec::new();
            };
            let Some(candles) = payload.as_array() else {
                return Vec::new();
            };
            return candles
                .iter()
                .filter_map(|candle| {
                    let open_time = candle.get("start")?.as_i64()?;
                    let close_time = candle.get("end")?.as_i64()?;
                    Some(CanonicalRecord::Kline(Kline {
                        meta: meta_for(candle, symbol.clone()),
                        interval: candle
                            .get("interval")
                            .and_then(Value::as_str)
                            .unwrap_or("60")
                            .to_string(),
                        open_time: DateTime::from_timestamp_millis(open_time)?,
                        close_time: DateTime::from_timestamp_millis(close_time)?,
                        open: field_f64(candle, "open"),
                        high: field_f64(candle, "high"),
                        low: field_f64(candle, "low"),
                        close: field_f64(candle, "close"),
                        volume: field_f64(candle, "volume"),
                        quote_volume: field_f64(candle, "turnover"),
                        trades: 0,
                        is_closed: candle.get("confirm").and_then(Value::as_bool).unwrap_or(false),
                    }))
                })
                .collect();
        }

        Vec::new()
    }

    fn max_subscriptions_per_connection(&self) -> Option<usize> {
        Some(200)
    }
}

fn field_f64(value: &Value, field: &str) -> f64 {
    optional_field_f64(value, field).unwrap_or_default()
}

fn optional_field_f64(value: &Value, field: &str) -> Option<f64> {
    parse_optional_f64(value.get(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_codec_roundtrip() {
        let adapter = BybitAdapter::perpetual();
        let symbol = CanonicalSymbol::new("BTC", "USDT");
        let venue_symbol = adapter.to_venue_symbol(&symbol, DataKind::Ticker);
        assert_eq!(venue_symbol, "BTCUSDT");
        assert_eq!(adapter.from_venue_symbol(&venue_symbol), Some(symbol));
    }

    #[test]
    fn test_build_subscribe_shape() {
        let adapter = BybitAdapter::spot();
        let key = SubscriptionKey::new(DataKind::Trade, CanonicalSymbol::new("BTC", "USDT"));
        let frames = adapter.build_subscribe(&[key]);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["op"], "subscribe");
        assert_eq!(value["args"][0], "publicTrade.BTCUSDT");
    }

    #[test]
    fn test_normalize_ticker_with_funding_emits_two_records() {
        let adapter = BybitAdapter::perpetual();
        let payload: Value = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","lastPrice":"50000","fundingRate":"0.0001","nextFundingTime":"1700100000000"}"#,
        )
        .unwrap();
        let frame = json!({"topic":"tickers.BTCUSDT","ts":1700000000000i64,"data":payload});
        let records = adapter.normalize("tickers.BTCUSDT", None, &frame["data"], Utc::now());
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], CanonicalRecord::Ticker(_)));
        assert!(matches!(records[1], CanonicalRecord::FundingRate(_)));
    }
}
