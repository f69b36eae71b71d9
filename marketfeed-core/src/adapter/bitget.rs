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

/// Bitget serves both trading classes over one public endpoint, distinguished by `instType` in
/// the subscribe arg rather than by a separate URL.
#[derive(Debug)]
pub struct BitgetAdapter {
    class: TradingClass,
}

impl BitgetAdapter {
    pub fn new(class: TradingClass) -> Self {
        Self { class }
    }

    fn inst_type(&self) -> &'static str {
        match self.class {
            TradingClass::Spot => "SPOT",
            TradingClass::Perpetual => "USDT-FUTURES",
        }
    }

    fn channel(&self, kind: DataKind) -> &'static str {
        match kind {
            DataKind::Ticker | DataKind::FundingRate => "ticker",
            DataKind::Depth => "books15",
            DataKind::Trade => "trade",
            DataKind::Kline => "candle1H",
        }
    }

    fn op_frame(&self, op: &str, keys: &[SubscriptionKey]) -> Vec<String> {
        let args: Vec<Value> = keys
            .iter()
            .map(|key| {
                json!({
                    "instType": self.inst_type(),
                    "channel": self.channel(key.kind),
                    "instId": self.to_venue_symbol(&key.symbol, key.kind),
                })
            })
            .collect();
        vec![json!({ "op": op, "args": args }).to_string()]
    }
}

#[async_trait]
impl VenueAdapter for BitgetAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bitget
    }

    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, _kind: DataKind) -> String {
        format!("{}{}", symbol.base(), symbol.quote())
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol> {
        const QUOTES: [&str; 3] = ["USDT", "USDC", "USD"];
        QUOTES.iter().find_map(|quote| {
            venue_symbol
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(|base| CanonicalSymbol::new(base, *quote))
        })
    }

    async fn open_session(&self, _http: &reqwest::Client) -> Result<Session, DataError> {
        let url =
            Url::parse("wss://ws.bitget.com/v2/ws/public").map_err(|e| DataError::Handshake {
                exchange: self.exchange(),
                reason: e.to_string(),
            })?;
        Ok(Session::new(url, std::time::Duration::from_secs(30)))
    }

    fn build_subscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.op_frame("subscribe", keys)
    }

    fn build_unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.op_frame("unsubscribe", keys)
    }

    fn heartbeat_frame(&self) -> Option<String> {
        Some("ping".to_string())
    }

    fn dispatch(&self, payload: &str) -> InboundFrame {
        if payload == "pong" {
            return InboundFrame::HeartbeatReply;
        }
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return InboundFrame::Other;
        };
        if value.get("event").and_then(Value::as_str) == Some("subscribe") {
            return InboundFrame::SubscriptionAck;
        }
        if value.get("event").and_then(Value::as_str) == Some("error") {
            return InboundFrame::Error(
                value
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("bitget error")
                    .to_string(),
            );
        }
        match (value.get("arg").and_then(|arg| arg.get("channel")), value.get("data")) {
            (Some(Value::String(channel)), Some(data)) => InboundFrame::Data {
                channel: channel.clone(),
                instrument_id: value
                    .get("arg")
                    .and_then(|arg| arg.get("instId"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                payload: data.clone(),
            },
            _ => InboundFrame::Other,
        }
    }

    fn normalize(
        &self,
        channel: &str,
        instrument_id: Option<&str>,
        payload: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<CanonicalRecord> {
        let Some(entries) = payload.as_array() else {
            return Vec::new();
        };
        entries
            .iter()
            .flat_map(|entry| self.normalize_entry(channel, instrument_id, entry, local_timestamp))
            .collect()
    }

    fn max_subscriptions_per_connection(&self) -> Option<usize> {
        None
    }
}

impl BitgetAdapter {
    fn implied_symbol(&self, instrument_id: Option<&str>, entry: &Value) -> Option<CanonicalSymbol> {
        instrument_id
            .or_else(|| entry.get("instId").and_then(Value::as_str))
            .and_then(|s| self.from_venue_symbol(s))
    }

    fn normalize_entry(
        &self,
        channel: &str,
        instrument_id: Option<&str>,
        entry: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<CanonicalRecord> {
        let Some(symbol) = self.implied_symbol(instrument_id, entry) else {
            return Vec::new();
        };

        let meta_for = |ts_field: &str| {
            let exchange_timestamp = entry
                .get(ts_field)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis);
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

        match channel {
            "ticker" => {
                let Some(last) = field(entry, "lastPr") else {
                    return Vec::new();
                };
                let open = field(entry, "open24h").unwrap_or(last);
                let change = last - open;
                let change_percent = field(entry, "change24h").unwrap_or_default() * 100.0;
                let mut records = vec![CanonicalRecord::Ticker(Ticker {
                    meta: meta_for("ts"),
                    last,
                    bid: field(entry, "bidPr").unwrap_or_default(),
                    bid_size: field(entry, "bidSz").unwrap_or_default(),
                    ask: field(entry, "askPr").unwrap_or_default(),
                    ask_size: field(entry, "askSz").unwrap_or_default(),
                    open,
                    high: field(entry, "high24h").unwrap_or_default(),
                    low: field(entry, "low24h").unwrap_or_default(),
                    volume: field(entry, "baseVolume").unwrap_or_default(),
                    quote_volume: field(entry, "quoteVolume").unwrap_or_default(),
                    change,
                    change_percent,
                    mark_price: field(entry, "markPrice"),
                    index_price: field(entry, "indexPrice"),
                    funding_rate: field(entry, "fundingRate"),
                    next_funding_time: None,
                })];

                if let Some(funding_rate) = field(entry, "fundingRate") {
                    records.push(CanonicalRecord::FundingRate(FundingRate {
                        meta: meta_for("ts"),
                        funding_rate,
                        mark_price: field(entry, "markPrice"),
                        index_price: field(entry, "indexPrice"),
                        next_funding_time: entry
                            .get("nextFundingTime")
                            .and_then(Value::as_str)
                            .and_then(|s| s.parse::<i64>().ok())
                            .and_then(DateTime::from_timestamp_millis),
                        predicted_next_funding_rate: None,
                    }));
                }

                records
            }
            "books15" => {
                let to_levels = |key: &str| -> Vec<PriceLevel> {
                    entry
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
                    meta: meta_for("ts"),
                    bids: to_levels("bids"),
                    asks: to_levels("asks"),
                })]
            }
            "trade" => {
                let Some(price) = field(entry, "price") else {
                    return Vec::new();
                };
                let side = match entry.get("side").and_then(Value::as_str) {
                    Some("sell") => Side::Sell,
                    _ => Side::Buy,
                };
                vec![CanonicalRecord::Trade(Trade {
                    meta: meta_for("ts"),
                    trade_id: entry
                        .get("tradeId")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    price,
                    amount: field(entry, "size").unwrap_or_default(),
                    side,
                })]
            }
            channel if channel.starts_with("candle") => {
                let Some(row) = entry.as_array() else {
                    return Vec::new();
                };
                let Some(open_time_ms) = row
                    .first()
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<i64>().ok())
                else {
                    return Vec::new();
                };
                let Some(open_time) = DateTime::from_timestamp_millis(open_time_ms) else {
                    return Vec::new();
                };
                vec![CanonicalRecord::Kline(Kline {
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
                    interval: channel.trim_start_matches("candle").to_string(),
                    open_time,
                    close_time: open_time + chrono::Duration::hours(1),
                    open: row.get(1).and_then(parse_f64).unwrap_or_default(),
                    high: row.get(2).and_then(parse_f64).unwrap_or_default(),
                    low: row.get(3).and_then(parse_f64).unwrap_or_default(),
                    close: row.get(4).and_then(parse_f64).unwrap_or_default(),
                    volume: row.get(5).and_then(parse_f64).unwrap_or_default(),
                    quote_volume: row.get(6).and_then(parse_f64).unwrap_or_default(),
                    trades: 0,
                    is_closed: false,
                })]
            }
            _ => Vec::new(),
        }
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
        let adapter = BitgetAdapter::new(TradingClass::Perpetual);
        let symbol = CanonicalSymbol::new("BTC", "USDT");
        let venue_symbol = adapter.to_venue_symbol(&symbol, DataKind::Ticker);
        assert_eq!(venue_symbol, "BTCUSDT");
        assert_eq!(adapter.from_venue_symbol(&venue_symbol), Some(symbol));
    }

    #[test]
    fn test_build_subscribe_shape() {
        let adapter = BitgetAdapter::new(TradingClass::Spot);
        let key = SubscriptionKey::new(DataKind::Trade, CanonicalSymbol::new("BTC", "USDT"));
        let frames = adapter.build_subscribe(&[key]);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["op"], "subscribe");
        assert_eq!(value["args"][0]["instType"], "SPOT");
        assert_eq!(value["args"][0]["channel"], "trade");
    }

    #[test]
    fn test_normalize_ticker_with_funding_emits_two_records() {
        let adapter = BitgetAdapter::new(TradingClass::Perpetual);
        let data: Value = serde_json::from_str(
            r#"[{"instId":"BTCUSDT","lastPr":"50000","fundingRate":"0.0001","ts":"1700000000000"}]"#,
        )
        .unwrap();

        let records = adapter.normalize("ticker", None, &data, Utc::now());
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], CanonicalRecord::Ticker(_)));
        assert!(matches!(records[1], CanonicalRecord::FundingRate(_)));
    }
}
