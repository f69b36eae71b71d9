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

/// OKX serves spot and linear-perpetual instruments over the same endpoint, distinguished only
/// by the `instId` suffix (`-SWAP`), so one adapter instance carries the trading class chosen
/// by the global `tradingType` configuration key.
#[derive(Debug)]
pub struct OkxAdapter {
    class: TradingClass,
}

impl OkxAdapter {
    pub fn new(class: TradingClass) -> Self {
        Self { class }
    }

    fn channel(&self, kind: DataKind) -> &'static str {
        match kind {
            DataKind::Ticker => "tickers",
            DataKind::Depth => "books5",
            DataKind::Trade => "trades",
            DataKind::FundingRate => "funding-rate",
            DataKind::Kline => "candle1H",
        }
    }

    fn op_frame(&self, op: &str, keys: &[SubscriptionKey]) -> Vec<String> {
        let args: Vec<Value> = keys
            .iter()
            .map(|key| {
                json!({
                    "channel": self.channel(key.kind),
                    "instId": self.to_venue_symbol(&key.symbol, key.kind),
                })
            })
            .collect();
        vec![json!({ "op": op, "args": args }).to_string()]
    }
}

#[async_trait]
impl VenueAdapter for OkxAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, _kind: DataKind) -> String {
        match self.class {
            TradingClass::Spot => format!("{}-{}", symbol.base(), symbol.quote()),
            TradingClass::Perpetual => format!("{}-{}-SWAP", symbol.base(), symbol.quote()),
        }
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol> {
        let without_swap = venue_symbol.strip_suffix("-SWAP").unwrap_or(venue_symbol);
        let (base, quote) = without_swap.split_once('-')?;
        Some(CanonicalSymbol::new(base, quote))
    }

    async fn open_session(&self, _http: &reqwest::Client) -> Result<Session, DataError> {
        let url =
            Url::parse("wss://ws.okx.com:8443/ws/v5/public").map_err(|e| DataError::Handshake {
                exchange: self.exchange(),
                reason: e.to_string(),
            })?;
        Ok(Session::new(url, std::time::Duration::from_secs(25)))
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
                    .unwrap_or("okx error")
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

impl OkxAdapter {
    fn normalize_entry(
        &self,
        channel: &str,
        instrument_id: Option<&str>,
        entry: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<CanonicalRecord> {
        let meta_for = |symbol: CanonicalSymbol, ts_field: &str| {
            let exchange_timestamp = entry
                .get(ts_field)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis);
            RecordMeta {
                venue: self.exchange(),
                symbol,
                exchange_timestamp,
                local_timestamp,
                unified_timestamp: crate::clock::unified_timestamp(
                    exchange_timestamp,
                    local_timestamp,
                ),
            }
        };

        match channel {
            "tickers" => {
                let Some(inst_id) = entry.get("instId").and_then(Value::as_str) else {
                    return Vec::new();
                };
                let Some(symbol) = self.from_venue_symbol(inst_id) else {
                    return Vec::new();
                };
                let Some(last) = field(entry, "last") else {
                    return Vec::new();
                };
                let open = field(entry, "open24h").unwrap_or(last);
                let change = last - open;
                let change_percent = if open != 0.0 { change / open * 100.0 } else { 0.0 };
                vec![CanonicalRecord::Ticker(Ticker {
                    meta: meta_for(symbol, "ts"),
                    last,
                    bid: field(entry, "bidPx").unwrap_or_default(),
                    bid_size: field(entry, "bidSz").unwrap_or_default(),
                    ask: field(entry, "askPx").unwrap_or_default(),
                    ask_size: field(entry, "askSz").unwrap_or_default(),
                    open,
                    high: field(entry, "high24h").unwrap_or_default(),
                    low: field(entry, "low24h").unwrap_or_default(),
                    volume: field(entry, "vol24h").unwrap_or_default(),
                    quote_volume: field(entry, "volCcy24h").unwrap_or_default(),
                    change,
                    change_percent,
                    mark_price: None,
                    index_price: None,
                    funding_rate: None,
                    next_funding_time: None,
                })]
            }
            "books5" => {
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
                let Some(symbol) = self.implied_symbol(instrument_id, entry) else {
                    return Vec::new();
                };
                vec![CanonicalRecord::Depth(Depth {
                    meta: meta_for(symbol, "ts"),
                    bids: to_levels("bids"),
                    asks: to_levels("asks"),
                })]
            }
            "trades" => {
                let Some(inst_id) = entry.get("instId").and_then(Value::as_str) else {
                    return Vec::new();
                };
                let Some(symbol) = self.from_venue_symbol(inst_id) else {
                    return Vec::new();
                };
                let Some(price) = field(entry, "px") else {
                    return Vec::new();
                };
                let side = match entry.get("side").and_then(Value::as_str) {
                    Some("sell") => Side::Sell,
                    _ => Side::Buy,
                };
                vec![CanonicalRecord::Trade(Trade {
                    meta: meta_for(symbol, "ts"),
                    trade_id: entry
                        .get("tradeId")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    price,
                    amount: field(entry, "sz").unwrap_or_default(),
                    side,
                })]
            }
            "funding-rate" => {
                let Some(inst_id) = entry.get("instId").and_then(Value::as_str) else {
                    return Vec::new();
                };
                let Some(symbol) = self.from_venue_symbol(inst_id) else {
                    return Vec::new();
                };
                let Some(funding_rate) = field(entry, "fundingRate") else {
                    return Vec::new();
                };
                vec![CanonicalRecord::FundingRate(FundingRate {
                    meta: meta_for(symbol, "ts"),
                    funding_rate,
                    mark_price: None,
                    index_price: None,
                    next_funding_time: entry
                        .get("fundingTime")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<i64>().ok())
                        .and_then(DateTime::from_timestamp_millis),
                    predicted_next_funding_rate: field(entry, "nextFundingRate"),
                })]
            }
            channel if channel.starts_with("candle") => {
                let Some(symbol) = self.implied_symbol(instrument_id, entry) else {
                    return Vec::new();
                };
                let Some(row) = entry.as_array() else {
                    return Vec::new();
                };
                let Some(open_time_ms) = row.first().and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok())
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
                    quote_volume: row.get(7).and_then(parse_f64).unwrap_or_default(),
                    trades: 0,
                    is_closed: row.get(8).and_then(Value::as_str) == Some("1"),
                })]
            }
            _ => Vec::new(),
        }
    }

    /// `books5` and `candle*` entries carry no `instId` of their own — only the frame-level
    /// `arg.instId` envelope identifies the instrument, threaded through as `instrument_id`.
    /// Falls back to a per-entry `instId` for venues/fixtures that do carry one.
    fn implied_symbol(&self, instrument_id: Option<&str>, entry: &Value) -> Option<CanonicalSymbol> {
        instrument_id
            .or_else(|| entry.get("instId").and_then(Value::as_str))
            .and_then(|s| self.from_venue_symbol(s))
    }
}

fn field(value: &Value, key: &str) -> Option<f64> {
    parse_optional_f64(value.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_codec_roundtrip_perpetual() {
        let adapter = OkxAdapter::new(TradingClass::Perpetual);
        let symbol = CanonicalSymbol::new("BTC", "USDT");
        let venue_symbol = adapter.to_venue_symbol(&symbol, DataKind::Depth);
        assert_eq!(venue_symbol, "BTC-USDT-SWAP");
        assert_eq!(adapter.from_venue_symbol(&venue_symbol), Some(symbol));
    }

    #[test]
    fn test_normalize_depth_matches_spec_scenario_b() {
        let adapter = OkxAdapter::new(TradingClass::Perpetual);
        let data: Value = serde_json::from_str(
            r#"[{"bids":[["50000","1"]],"asks":[["50001","2"]],"ts":"1700000001000"}]"#,
        )
        .unwrap();

        let records = adapter.normalize("books5", Some("BTC-USDT-SWAP"), &data, Utc::now());
        assert_eq!(records.len(), 1);
        let CanonicalRecord::Depth(depth) = &records[0] else {
            panic!("expected Depth");
        };
        assert_eq!(depth.meta.symbol, CanonicalSymbol::new("BTC", "USDT"));
        assert_eq!(depth.bids, vec![PriceLevel { price: 50_000.0, size: 1.0 }]);
        assert_eq!(depth.asks, vec![PriceLevel { price: 50_001.0, size: 2.0 }]);
    }
}
