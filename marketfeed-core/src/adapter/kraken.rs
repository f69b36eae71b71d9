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

/// `BTC` is listed under Kraken's legacy `XBT` ticker on both the spot and futures wire; spot
/// additionally rewrites the quote leg (`USDT` pairs are quoted `USD` in Kraken's own book).
fn alias_base(base: &str) -> &str {
    if base.eq_ignore_ascii_case("BTC") {
        "XBT"
    } else {
        base
    }
}

fn unalias_base(base: &str) -> &str {
    if base.eq_ignore_ascii_case("XBT") {
        "BTC"
    } else {
        base
    }
}

/// Kraken Spot: array-shaped `[channelID, data, channelName, pair]` push frames over
/// `wss://ws.kraken.com`, subscribed with `{event:"subscribe", pair, subscription:{name}}`.
#[derive(Debug)]
pub struct KrakenSpotAdapter;

impl KrakenSpotAdapter {
    pub fn new() -> Self {
        Self
    }

    fn subscription_name(kind: DataKind) -> &'static str {
        match kind {
            DataKind::Ticker | DataKind::FundingRate => "ticker",
            DataKind::Depth => "book",
            DataKind::Trade => "trade",
            DataKind::Kline => "ohlc",
        }
    }

    fn event_frame(&self, event: &str, keys: &[SubscriptionKey]) -> Vec<String> {
        // Kraken groups pairs by subscription kind within one frame per kind, since
        // `subscription.name` is frame-global rather than per-pair.
        let mut by_kind: std::collections::BTreeMap<DataKind, Vec<String>> =
            std::collections::BTreeMap::new();
        for key in keys {
            by_kind
                .entry(key.kind)
                .or_default()
                .push(self.to_venue_symbol(&key.symbol, key.kind));
        }
        by_kind
            .into_iter()
            .map(|(kind, pairs)| {
                json!({
                    "event": event,
                    "pair": pairs,
                    "subscription": { "name": Self::subscription_name(kind) },
                })
                .to_string()
            })
            .collect()
    }
}

impl Default for KrakenSpotAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for KrakenSpotAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::KrakenSpot
    }

    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, _kind: DataKind) -> String {
        format!("{}/{}", alias_base(symbol.base()), symbol.quote())
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol> {
        let (base, quote) = venue_symbol.split_once('/')?;
        Some(CanonicalSymbol::new(unalias_base(base), quote))
    }

    async fn open_session(&self, _http: &reqwest::Client) -> Result<Session, DataError> {
        let url = Url::parse("wss://ws.kraken.com").map_err(|e| DataError::Handshake {
            exchange: self.exchange(),
            reason: e.to_string(),
        })?;
        Ok(Session::new(url, std::time::Duration::from_secs(30)))
    }

    fn build_subscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.event_frame("subscribe", keys)
    }

    fn build_unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.event_frame("unsubscribe", keys)
    }

    fn heartbeat_frame(&self) -> Option<String> {
        None
    }

    fn dispatch(&self, payload: &str) -> InboundFrame {
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return InboundFrame::Other;
        };

        if let Some(obj) = value.as_object() {
            match obj.get("event").and_then(Value::as_str) {
                Some("heartbeat") => return InboundFrame::HeartbeatReply,
                Some("subscriptionStatus") => {
                    return if obj.get("status").and_then(Value::as_str) == Some("error") {
                        InboundFrame::Error(
                            obj.get("errorMessage")
                                .and_then(Value::as_str)
                                .unwrap_or("kraken error")
                                .to_string(),
                        )
                    } else {
                        InboundFrame::SubscriptionAck
                    };
                }
                Some("systemStatus") | Some("pong") => return InboundFrame::Other,
                _ => {}
            }
        }

        // Data frames are bare arrays: [channelID, payload, channelName, pair].
        let Some(frame) = value.as_array() else {
            return InboundFrame::Other;
        };
        if frame.len() < 4 {
            return InboundFrame::Other;
        }
        let Some(channel_name) = frame[2].as_str() else {
            return InboundFrame::Other;
        };
        let Some(pair) = frame[3].as_str() else {
            return InboundFrame::Other;
        };
        InboundFrame::Data {
            channel: channel_name.to_string(),
            instrument_id: Some(pair.to_string()),
            payload: frame[1].clone(),
        }
    }

    fn normalize(
        &self,
        channel: &str,
        instrument_id: Option<&str>,
        payload: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<CanonicalRecord> {
        let Some(pair) = instrument_id else {
            return Vec::new();
        };
        let Some(symbol) = self.from_venue_symbol(pair) else {
            return Vec::new();
        };

        let meta = RecordMeta {
            venue: self.exchange(),
            symbol: symbol.clone(),
            exchange_timestamp: None,
            local_timestamp,
            unified_timestamp: local_timestamp,
        };

        if channel == "ticker" {
            let Some(last) = payload.get("c").and_then(|v| v.as_array()).and_then(|v| v.first()).and_then(parse_f64)
            else {
                return Vec::new();
            };
            let open = array_field(payload, "o", 0).unwrap_or(last);
            return vec![CanonicalRecord::Ticker(Ticker {
                meta,
                last,
                bid: array_field(payload, "b", 0).unwrap_or_default(),
                bid_size: array_field(payload, "b", 2).unwrap_or_default(),
                ask: array_field(payload, "a", 0).unwrap_or_default(),
                ask_size: array_field(payload, "a", 2).unwrap_or_default(),
                open,
                high: array_field(payload, "h", 1).unwrap_or_default(),
                low: array_field(payload, "l", 1).unwrap_or_default(),
                volume: array_field(payload, "v", 1).unwrap_or_default(),
                quote_volume: 0.0,
                change: last - open,
                change_percent: if open != 0.0 { (last - open) / open * 100.0 } else { 0.0 },
                mark_price: None,
                index_price: None,
                funding_rate: None,
                next_funding_time: None,
            })];
        }

        if channel.starts_with("book") {
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
            let bids = levels("bs").into_iter().chain(levels("b")).collect();
            let asks = levels("as").into_iter().chain(levels("a")).collect();
            return vec![CanonicalRecord::Depth(Depth { meta, bids, asks })];
        }

        if channel == "trade" {
            let Some(trades) = payload.as_array() else {
                return Vec::new();
            };
            return trades
                .iter()
                .filter_map(|trade| {
                    let trade = trade.as_array()?;
                    let price = parse_f64(trade.first()?)?;
                    let amount = parse_f64(trade.get(1)?)?;
                    let side = match trade.get(3).and_then(Value::as_str) {
                        Some("s") => Side::Sell,
                        _ => Side::Buy,
                    };
                    Some(CanonicalRecord::Trade(Trade {
                        meta: meta.clone(),
                        trade_id: String::new(),
                        price,
                        amount,
                        side,
                    }))
                })
                .collect();
        }

        if channel.starts_with("ohlc") {
            let Some(row) = payload.as_array() else {
                return Vec::new();
            };
            let Some(open_time_s) = row.first().and_then(Value::as_f64) else {
                return Vec::new();
            };
            let Some(close_time_s) = row.get(1).and_then(Value::as_f64) else {
                return Vec::new();
            };
            let Some(open_time) = DateTime::from_timestamp(open_time_s as i64, 0) else {
                return Vec::new();
            };
            let Some(close_time) = DateTime::from_timestamp(close_time_s as i64, 0) else {
                return Vec::new();
            };
            return vec![CanonicalRecord::Kline(Kline {
                meta: RecordMeta {
                    exchange_timestamp: Some(open_time),
                    unified_timestamp: crate::clock::unified_timestamp(Some(open_time), local_timestamp),
                    ..meta
                },
                interval: channel.trim_start_matches("ohlc-").to_string(),
                open_time,
                close_time,
                open: row.get(2).and_then(parse_f64).unwrap_or_default(),
                high: row.get(3).and_then(parse_f64).unwrap_or_default(),
                low: row.get(4).and_then(parse_f64).unwrap_or_default(),
                close: row.get(5).and_then(parse_f64).unwrap_or_default(),
                volume: row.get(7).and_then(parse_f64).unwrap_or_default(),
                quote_volume: 0.0,
                trades: row.get(8).and_then(Value::as_u64).unwrap_or_default(),
                is_closed: false,
            })];
        }

        Vec::new()
    }
}

fn array_field(value: &Value, key: &str, index: usize) -> Option<f64> {
    value.get(key).and_then(Value::as_array).and_then(|a| a.get(index)).and_then(parse_f64)
}

/// Kraken Futures: object-shaped `{feed, product_id, …}` push frames over
/// `wss://futures.kraken.com/ws/v1`, subscribed with `{event:"subscribe", feed, product_ids}`.
#[derive(Debug)]
pub struct KrakenFuturesAdapter;

impl KrakenFuturesAdapter {
    pub fn new() -> Self {
        Self
    }

    fn feed(&self, kind: DataKind) -> &'static str {
        match kind {
            DataKind::Ticker | DataKind::FundingRate => "ticker",
            DataKind::Depth => "book",
            DataKind::Trade => "trade",
            DataKind::Kline => "candles_trade_1h",
        }
    }

    fn event_frame(&self, event: &str, keys: &[SubscriptionKey]) -> Vec<String> {
        let mut by_kind: std::collections::BTreeMap<DataKind, Vec<String>> =
            std::collections::BTreeMap::new();
        for key in keys {
            by_kind
                .entry(key.kind)
                .or_default()
                .push(self.to_venue_symbol(&key.symbol, key.kind));
        }
        by_kind
            .into_iter()
            .map(|(kind, ids)| {
                json!({ "event": event, "feed": self.feed(kind), "product_ids": ids }).to_string()
            })
            .collect()
    }
}

impl Default for KrakenFuturesAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for KrakenFuturesAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::KrakenFutures
    }

    fn to_venue_symbol(&self, symbol: &CanonicalSymbol, _kind: DataKind) -> String {
        format!("PI_{}{}", alias_base(symbol.base()), symbol.quote())
    }

    fn from_venue_symbol(&self, venue_symbol: &str) -> Option<CanonicalSymbol> {
        let rest = venue_symbol.strip_prefix("PI_")?;
        const QUOTES: [&str; 2] = ["USD", "USDT"];
        QUOTES.iter().find_map(|quote| {
            rest.strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(|base| CanonicalSymbol::new(unalias_base(base), *quote))
        })
    }

    async fn open_session(&self, _http: &reqwest::Client) -> Result<Session, DataError> {
        let url =
            Url::parse("wss://futures.kraken.com/ws/v1").map_err(|e| DataError::Handshake {
                exchange: self.exchange(),
                reason: e.to_string(),
            })?;
        Ok(Session::new(url, std::time::Duration::from_secs(30)))
    }

    fn build_subscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.event_frame("subscribe", keys)
    }

    fn build_unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        self.event_frame("unsubscribe", keys)
    }

    fn heartbeat_frame(&self) -> Option<String> {
        None
    }

    fn dispatch(&self, payload: &str) -> InboundFrame {
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return InboundFrame::Other;
        };
        match value.get("event").and_then(Value::as_str) {
            Some("subscribed") => return InboundFrame::SubscriptionAck,
            Some("error") => {
                return InboundFrame::Error(
                    value
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("kraken futures error")
                        .to_string(),
                );
            }
            _ => {}
        }
        if value.get("feed").and_then(Value::as_str) == Some("heartbeat") {
            return InboundFrame::HeartbeatReply;
        }
        let Some(feed) = value.get("feed").and_then(Value::as_str) else {
            return InboundFrame::Other;
        };
        InboundFrame::Data {
            channel: feed.to_string(),
            instrument_id: value
                .get("product_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            payload: value,
        }
    }

    fn normalize(
        &self,
        channel: &str,
        instrument_id: Option<&str>,
        payload: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<CanonicalRecord> {
        let Some(product_id) = instrument_id else {
            return Vec::new();
        };
        let Some(symbol) = self.from_venue_symbol(product_id) else {
            return Vec::new();
        };

        let exchange_timestamp = payload
            .get("time")
            .and_then(Value::as_i64)
            .and_then(DateTime::from_timestamp_millis);
        let meta = RecordMeta {
            venue: self.exchange(),
            symbol,
            exchange_timestamp,
            local_timestamp,
            unified_timestamp: crate::clock::unified_timestamp(exchange_timestamp, local_timestamp),
        };

        match channel {
            "ticker" => {
                let Some(last) = field(payload, "last") else {
                    return Vec::new();
                };
                let open = field(payload, "open24h").unwrap_or(last);
                let mut records = vec![CanonicalRecord::Ticker(Ticker {
                    meta: meta.clone(),
                    last,
                    bid: field(payload, "bid").unwrap_or_default(),
                    bid_size: field(payload, "bidSize").unwrap_or_default(),
                    ask: field(payload, "ask").unwrap_or_default(),
                    ask_size: field(payload, "askSize").unwrap_or_default(),
                    open,
                    high: field(payload, "high24h").unwrap_or_default(),
                    low: field(payload, "low24h").unwrap_or_default(),
                    volume: field(payload, "vol24h").unwrap_or_default(),
                    quote_volume: 0.0,
                    change: last - open,
                    change_percent: field(payload, "change24h").unwrap_or_default(),
                    mark_price: field(payload, "markPrice"),
                    index_price: field(payload, "index"),
                    funding_rate: field(payload, "fundingRate"),
                    next_funding_time: None,
                })];
                if let Some(funding_rate) = field(payload, "fundingRate") {
                    records.push(CanonicalRecord::FundingRate(FundingRate {
                        meta,
                        funding_rate,
                        mark_price: field(payload, "markPrice"),
                        index_price: field(payload, "index"),
                        next_funding_time: None,
                        predicted_next_funding_rate: field(payload, "fundingRatePrediction"),
                    }));
                }
                records
            }
            "book" => {
                let bids = payload
                    .get("bids")
                    .and_then(Value::as_array)
                    .map(|levels| levels_from_objects(levels))
                    .unwrap_or_default();
                let asks = payload
                    .get("asks")
                    .and_then(Value::as_array)
                    .map(|levels| levels_from_objects(levels))
                    .unwrap_or_default();
                vec![CanonicalRecord::Depth(Depth { meta, bids, asks })]
            }
            "trade" => {
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
                        .get("uid")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    price,
                    amount: field(payload, "qty").unwrap_or_default(),
                    side,
                })]
            }
            _ => Vec::new(),
        }
    }
}

fn levels_from_objects(levels: &[Value]) -> Vec<PriceLevel> {
    levels
        .iter()
        .filter_map(|level| {
            Some(PriceLevel {
                price: parse_optional_f64(level.get("price"))?,
                size: parse_optional_f64(level.get("qty"))?,
            })
        })
        .collect()
}

fn field(value: &Value, key: &str) -> Option<f64> {
    parse_optional_f64(value.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_alias_roundtrip_spot() {
        let adapter = KrakenSpotAdapter::new();
        let symbol = CanonicalSymbol::new("BTC", "USDT");
        let venue_symbol = adapter.to_venue_symbol(&symbol, DataKind::Ticker);
        assert_eq!(venue_symbol, "XBT/USDT");
        assert_eq!(adapter.from_venue_symbol(&venue_symbol), Some(symbol));
    }

    #[test]
    fn test_build_subscribe_contains_xbt_pair() {
        let adapter = KrakenSpotAdapter::new();
        let key = SubscriptionKey::new(DataKind::Ticker, CanonicalSymbol::new("BTC", "USDT"));
        let frames = adapter.build_subscribe(&[key]);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["pair"][0], "XBT/USDT");
        assert_eq!(value["subscription"]["name"], "ticker");
    }

    #[test]
    fn test_dispatch_and_normalize_spot_ticker_resolves_to_btc() {
        let adapter = KrakenSpotAdapter::new();
        let frame = adapter.dispatch(
            r#"[340, {"c":["50000.0","1"],"o":["49000.0"],"h":["51000.0"],"l":["48000.0"],"v":["100.0"],"b":["49999.0","1","1"],"a":["50001.0","1","1"]}, "ticker", "XBT/USDT"]"#,
        );
        let InboundFrame::Data { channel, instrument_id, payload } = frame else {
            panic!("expected Data frame");
        };
        assert_eq!(channel, "ticker");
        assert_eq!(instrument_id.as_deref(), Some("XBT/USDT"));

        let records = adapter.normalize(&channel, instrument_id.as_deref(), &payload, Utc::now());
        let CanonicalRecord::Ticker(ticker) = &records[0] else {
            panic!("expected Ticker");
        };
        assert_eq!(ticker.meta.symbol, CanonicalSymbol::new("BTC", "USDT"));
        assert_eq!(ticker.last, 50_000.0);
    }

    #[test]
    fn test_futures_symbol_codec_roundtrip() {
        let adapter = KrakenFuturesAdapter::new();
        let symbol = CanonicalSymbol::new("BTC", "USD");
        let venue_symbol = adapter.to_venue_symbol(&symbol, DataKind::Ticker);
        assert_eq!(venue_symbol, "PI_XBTUSD");
        assert_eq!(adapter.from_venue_symbol(&venue_symbol), Some(symbol));
    }
}
