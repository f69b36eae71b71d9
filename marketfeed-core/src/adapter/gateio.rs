use crate::{
    adapter::{InboundFrame, Session, TradingClass, VenueAdapter, parse_f64, parse_optional_f64},
    error::DataError,
    kind::{DataKind, SubscriptionKey},
    record::{CanonicalRecord, Depth, FundingRate, Kline, PriceLevel, RecordMeta, Ticker, Trade},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketfeed_instrument::{Side, exchange::ExchangeId, symbol::CanonicalSymbol};
use serde_json::{Value, json};
use url::Url;

/// Gate multiplexes every channel over `{time, channel, event, payload}` for subscribe requests
/// and answers pushes as `{time, channel, event:"update", result}`. Spot and perpetual share this
/// envelope but use different channel name prefixes and endpoints.
#[derive(Debug)]
pub struct GateAdapter {
    class: TradingClass,
}

impl GateAdapter {
    pub fn new(class: TradingClass) -> Self {
        Self { class }
    }

    fn prefix(&self) -> &'static str {
        match self.class {
            TradingClass::Spot => "spot",
            TradingClass::Perpetual => "futures",
        }
    }

    fn channel(&self, kind: DataKind) -> String {
        let prefix = self.prefix();
        match kind {
            DataKind::Ticker | DataKind::FundingRate => format!("{prefix}.tickers"),
            DataKind::Depth => format!("{prefix}.order_book"),
            DataKind::Trade => format!("{prefix}.trades"),
            DataKind::Kline => format!("{prefix}.candlesticks"),
        }
    }

    fn payload_for(&self, key: &SubscriptionKey) -> Vec<String> {
        let symbol = self.to_venue_symbol(&key.symbol, key.kind);
        match key.kind {
            DataKind::Depth => vec![symbol, "20".to_string(), "100ms".to_string()],
            DataKind::Kline => vec!["10s".to_string(), symbol],
            _ => vec![symbol],
        }
    }

    fn frame(&self, event: &str, keys: &[SubscriptionKey]) -> Vec<String> {
        keys.iter()
            .map(|key| {
                json!({
                    "time": Utc::now().timestamp(),
                    "channel": self.channel(key.kind),
                    "event": event,
                    "payload": self.payload_for(key),
                })
                .to_string()
            })
            .collect()
    }

    fn symbol_field(payload: &Value) -> Option<&str> {
        payload
            .get("currency_pair")
            .or_else(|| payload.get("contract"))
            .or_else(|| payload.get("s"))
            .and_then(Value::as_str)
    }
}

#[async_trait]
impl VenueAdapter for GateAdapter {
    fn exchange(&self) -> ExchangeId {
        match self.class {
            TradingClass::Spot => ExchangeId::GateSpot,
            TradingClass::Perpetual => ExchangeId::GatePerpetual,
        }
    }

    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, _kind: DataKind) -> String {
        format!("{}_{}", symbol.base(), symbol.quote())
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol> {
        let (base, quote) = venue_symbol.split_once('_')?;
        Some(CanonicalSymbol::new(base, quote))
    }

    async fn open_session(&self, _http: &reqwest::Client) -> Result<Session, DataError> {
        let url = match self.class {
            TradingClass::Spot => "wss://api.gateio.ws/ws/v4/",
            TradingClass::Perpetual => "wss://fx-ws.gateio.ws/v4/ws/usdt",
        };
        let url = Url::parse(url).map_err(|e| DataError::Handshake {
            exchange: self.exchange(),
            reason: e.to_string(),
        })?;
        Ok(Session::new(url, std::time::Duration::from_secs(15)))
    }

    fn build_subscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.frame("subscribe", keys)
    }

    fn build_unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.frame("unsubscribe", keys)
    }

    fn heartbeat_frame(&self) -> Option<String> {
        Some(
            json!({ "time": Utc::now().timestamp(), "channel": format!("{}.ping", self.prefix()) })
                .to_string(),
        )
    }

    fn dispatch(&self, payload: &str) -> InboundFrame {
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return InboundFrame::Other;
        };

        let event = value.get("event").and_then(Value::as_str);
        if event == Some("subscribe") || event == Some("unsubscribe") {
            if value
                .get("error")
                .is_some_and(|e| !e.is_null())
            {
                return InboundFrame::Error(
                    value["error"]["message"]
                        .as_str()
                        .unwrap_or("gate error")
                        .to_string(),
                );
            }
            return InboundFrame::SubscriptionAck;
        }
        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            return InboundFrame::Error(
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("gate error")
                    .to_string(),
            );
        }
        if event == Some("update") {
            if let (Some(Value::String(channel)), Some(result)) =
                (value.get("channel"), value.get("result"))
            {
                return InboundFrame::Data {
                    channel: channel.clone(),
                    instrument_id: None,
                    payload: result.clone(),
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
        // Candlestick pushes carry the pair only inside `n` (`"<interval>_<pair>"`), everything
        // else exposes it directly as `currency_pair`/`contract`/`s`.
        let inst = if channel.ends_with("candlesticks") {
            payload
                .get("n")
                .and_then(Value::as_str)
                .and_then(|n| n.split_once('_').map(|(_, pair)| pair))
        } else {
            Self::symbol_field(payload)
        };
        let Some(inst) = inst else {
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

        if channel.ends_with("tickers") {
            let Some(last) = field(payload, "last") else {
                return Vec::new();
            };
            let funding_rate = field(payload, "funding_rate");
            // Gate does not push an explicit next funding timestamp on this channel; approximate
            // with the 8-hour funding cadence from the moment the record was observed.
            let next_funding_time = funding_rate.map(|_| local_timestamp + chrono::Duration::hours(8));

            let mut records = vec![CanonicalRecord::Ticker(Ticker {
                meta: meta_for(None),
                last,
                bid: field(payload, "highest_bid").unwrap_or_default(),
                bid_size: 0.0,
                ask: field(payload, "lowest_ask").unwrap_or_default(),
                ask_size: 0.0,
                open: 0.0,
                high: field(payload, "high_24h").unwrap_or_default(),
                low: field(payload, "low_24h").unwrap_or_default(),
                volume: field(payload, "base_volume").unwrap_or_default(),
                quote_volume: field(payload, "quote_volume").unwrap_or_default(),
                change: 0.0,
                change_percent: field(payload, "change_percentage").unwrap_or_default(),
                mark_price: field(payload, "mark_price"),
                index_price: field(payload, "index_price"),
                funding_rate,
                next_funding_time,
            })];

            if let Some(funding_rate) = funding_rate {
                records.push(CanonicalRecord::FundingRate(FundingRate {
                    meta: meta_for(None),
                    funding_rate,
                    mark_price: field(payload, "mark_price"),
                    index_price: field(payload, "index_price"),
                    next_funding_time,
                    predicted_next_funding_rate: field(payload, "funding_rate_indicative"),
                }));
            }

            return records;
        }

        if channel.ends_with("order_book") {
            let ts_ms = payload.get("t").and_then(Value::as_i64);
            let levels = |key: &str| -> Vec<PriceLevel> {
                payload
                    .get(key)
                    .and_then(Value::as_array)
                    .map(|levels| {
                        levels
                            .iter()
                            .filter_map(|level| match level {
                                Value::Array(pair) => Some(PriceLevel {
                                    price: parse_f64(pair.first()?)?,
                                    size: parse_f64(pair.get(1)?)?,
                                }),
                                Value::Object(_) => Some(PriceLevel {
                                    price: parse_optional_f64(level.get("p"))?,
                                    size: parse_optional_f64(level.get("s"))?,
                                }),
                                _ => None,
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

        if channel.ends_with("trades") {
            let Some(price) = field(payload, "price") else {
                return Vec::new();
            };
            let side = match payload.get("side").and_then(Value::as_str) {
                Some("sell") => Side::Sell,
                Some("buy") => Side::Buy,
                _ => match payload.get("size").and_then(Value::as_f64) {
                    Some(size) if size < 0.0 => Side::Sell,
                    _ => Side::Buy,
                },
            };
            let amount = field(payload, "amount")
                .or_else(|| payload.get("size").and_then(Value::as_f64).map(f64::abs))
                .unwrap_or_default();
            return vec![CanonicalRecord::Trade(Trade {
                meta: meta_for(payload.get("create_time_ms").and_then(Value::as_i64)),
                trade_id: payload
                    .get("id")
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                price,
                amount,
                side,
            })];
        }

        if channel.ends_with("candlesticks") {
            let Some(open_time_s) = payload
                .get("t")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .or_else(|| payload.get("t").and_then(Value::as_i64))
            else {
                return Vec::new();
            };
            let Some(open_time) = DateTime::from_timestamp(open_time_s, 0) else {
                return Vec::new();
            };
            return vec![CanonicalRecord::Kline(Kline {
                meta: RecordMeta {
                    venue: self.exchange(),
                    symbol,
                    exchange_timestamp: Some(open_time),
                    local_timestamp,
                    unified_timestamp: crate::clock::unified_timestamp(
                        Some(open_time),
                        local_timestamp,
                    ),
                },
                interval: "10s".to_string(),
                open_time,
                close_time: open_time + chrono::Duration::seconds(10),
                open: field(payload, "o").unwrap_or_default(),
                high: field(payload, "h").unwrap_or_default(),
                low: field(payload, "l").unwrap_or_default(),
                close: field(payload, "c").unwrap_or_default(),
                volume: field(payload, "v").unwrap_or_default(),
                quote_volume: 0.0,
                trades: 0,
                is_closed: false,
            })];
        }

        Vec::new()
    }

    fn max_subscriptions_per_connection(&self) -> Option<usize> {
        None
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
        let adapter = GateAdapter::new(TradingClass::Spot);
        let symbol = CanonicalSymbol::new("BTC", "USDT");
        let venue_symbol = adapter.to_venue_symbol(&symbol, DataKind::Ticker);
        assert_eq!(venue_symbol, "BTC_USDT");
        assert_eq!(adapter.from_venue_symbol(&venue_symbol), Some(symbol));
    }

    #[test]
    fn test_build_subscribe_shape() {
        let adapter = GateAdapter::new(TradingClass::Perpetual);
        let key = SubscriptionKey::new(DataKind::Ticker, CanonicalSymbol::new("BTC", "USDT"));
        let frames = adapter.build_subscribe(&[key]);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["channel"], "futures.tickers");
        assert_eq!(value["event"], "subscribe");
        assert_eq!(value["payload"][0], "BTC_USDT");
    }

    #[test]
    fn test_normalize_ticker_with_funding_uses_eight_hour_heuristic() {
        let adapter = GateAdapter::new(TradingClass::Perpetual);
        let local_timestamp = Utc::now();
        let payload: Value = serde_json::from_str(
            r#"{"contract":"BTC_USDT","last":"50000","funding_rate":"0.0001"}"#,
        )
        .unwrap();

        let records = adapter.normalize("futures.tickers", None, &payload, local_timestamp);
        assert_eq!(records.len(), 2);
        let CanonicalRecord::FundingRate(funding) = &records[1] else {
            panic!("expected FundingRate");
        };
        assert_eq!(
            funding.next_funding_time,
            Some(local_timestamp + chrono::Duration::hours(8))
        );
    }
}
